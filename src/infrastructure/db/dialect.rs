use crate::domain::schema::Column;
use crate::domain::sql_type::TypeTag;

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// SQL dialect: identifier quoting, bind placeholders, catalog
/// introspection queries and the catalog-type → [`TypeTag`] mapping.
///
/// Implemented per driver. The interface is pure string manipulation with
/// no sqlx dependency, so it crosses the layer boundary cleanly.
/// Introspection queries inline their (escaped) inputs instead of binding
/// them — SQLite's `pragma_table_info` cannot take bind parameters, so the
/// whole introspection path stays uniform.
pub trait Dialect: Send + Sync {
    /// Driver name as a lowercase string ("postgres", "mysql", "sqlite").
    fn name(&self) -> &'static str;

    /// Quote an identifier (table or column) per dialect.
    /// - MySQL / MariaDB → backtick: `` `col` ``
    /// - PostgreSQL / SQLite → double-quote: `"col"`
    fn quote_ident(&self, s: &str) -> String;

    /// The bind placeholder for the 1-based parameter `index`.
    fn bind_marker(&self, index: usize) -> String {
        let _ = index;
        "?".to_string()
    }

    /// One result row per column of `table`, in ordinal order, every value
    /// readable as text: name, ordinal position, catalog type name, size,
    /// scale, nullable (`YES`/`NO`), auto-increment (`YES`/`NO`), remarks.
    fn columns_query(&self, table: &str) -> String;

    /// One result row per primary-key column of `table`, in key order:
    /// column name, constraint name (may be empty).
    fn primary_key_query(&self, table: &str) -> String;

    /// Result rows naming the tables that match a SQL `LIKE` pattern.
    fn tables_query(&self, pattern: &str) -> String;

    /// Result rows naming `table` iff it exists.
    fn table_exists_query(&self, table: &str) -> String;

    /// Map a catalog type name (lowercased, parenthesized length already
    /// stripped) to a type tag. `None` marks an unsupported type — the
    /// caller degrades it to [`TypeTag::Other`] and captures it as text.
    fn map_type(&self, catalog_type: &str) -> Option<TypeTag>;

    /// `true` when `sqlx::AnyRow` decodes this tag natively for the driver,
    /// without an explicit text cast in the SELECT.
    fn is_native(&self, tag: TypeTag) -> bool;

    /// The cast expression coercing a non-native column to driver-readable
    /// text.
    fn cast_to_text(&self, col_quoted: &str) -> String;

    /// SELECT expression for one column: native and binary columns pass
    /// through unchanged (binary is decoded client-side as raw bytes),
    /// everything else is cast to text and canonicalized client-side.
    fn select_expr(&self, column: &Column) -> String {
        let quoted = self.quote_ident(&column.name);
        if self.is_native(column.tag) || column.tag.is_binary() {
            quoted
        } else {
            self.cast_to_text(&quoted)
        }
    }
}

/// Escape a value for inlining into a single-quoted SQL string.
fn sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Split a declared type like `varchar(30)` or `numeric(10,2)` into its
/// lowercased base name, size and scale. SQLite reports column types this
/// way; the other drivers return the base name and separate size columns.
pub fn split_declared_type(declared: &str) -> (String, u32, i32) {
    let declared = declared.trim();
    let Some(open) = declared.find('(') else {
        return (declared.to_ascii_lowercase(), 0, 0);
    };
    let base = declared[..open].trim().to_ascii_lowercase();
    let args = declared[open + 1..].trim_end_matches(')');
    let mut parts = args.split(',').map(str::trim);
    let size = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let scale = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (base, size, scale)
}

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ─────────────────────────────────────────────────────────────────────────────

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }

    fn bind_marker(&self, index: usize) -> String {
        format!("${index}")
    }

    fn columns_query(&self, table: &str) -> String {
        format!(
            "select column_name::text, ordinal_position::text, data_type::text, \
             coalesce(character_maximum_length, numeric_precision, 0)::text, \
             coalesce(numeric_scale, 0)::text, \
             is_nullable::text, \
             case when is_identity = 'YES' or column_default like 'nextval%' \
                  then 'YES' else 'NO' end, \
             '' \
             from information_schema.columns \
             where table_schema = current_schema() and table_name = lower('{}') \
             order by ordinal_position",
            sql_string(table)
        )
    }

    fn primary_key_query(&self, table: &str) -> String {
        format!(
            "select kcu.column_name::text, tc.constraint_name::text \
             from information_schema.table_constraints tc \
             join information_schema.key_column_usage kcu \
               on tc.constraint_name = kcu.constraint_name \
              and tc.table_schema = kcu.table_schema \
             where tc.constraint_type = 'PRIMARY KEY' \
               and tc.table_schema = current_schema() \
               and tc.table_name = lower('{}') \
             order by kcu.ordinal_position",
            sql_string(table)
        )
    }

    fn tables_query(&self, pattern: &str) -> String {
        format!(
            "select table_name::text from information_schema.tables \
             where table_schema = current_schema() and table_type = 'BASE TABLE' \
               and table_name like lower('{}') \
             order by table_name",
            sql_string(pattern)
        )
    }

    fn table_exists_query(&self, table: &str) -> String {
        format!(
            "select table_name::text from information_schema.tables \
             where table_schema = current_schema() and table_name = lower('{}')",
            sql_string(table)
        )
    }

    fn map_type(&self, catalog_type: &str) -> Option<TypeTag> {
        Some(match catalog_type {
            "smallint" => TypeTag::SmallInt,
            "integer" => TypeTag::Integer,
            "bigint" => TypeTag::BigInt,
            "real" => TypeTag::Real,
            "double precision" => TypeTag::Double,
            "numeric" | "decimal" => TypeTag::Numeric,
            "money" => TypeTag::Numeric,
            "character varying" | "varchar" => TypeTag::Varchar,
            "character" | "char" | "bpchar" => TypeTag::Char,
            "uuid" => TypeTag::Char,
            "text" => TypeTag::LongVarchar,
            "boolean" => TypeTag::Boolean,
            "date" => TypeTag::Date,
            "time without time zone" | "time" => TypeTag::Time,
            "time with time zone" => TypeTag::TimeWithTimezone,
            "timestamp without time zone" | "timestamp" => TypeTag::Timestamp,
            "timestamp with time zone" => TypeTag::TimestampWithTimezone,
            "bytea" => TypeTag::Blob,
            "json" | "jsonb" => TypeTag::Clob,
            "xml" => TypeTag::Xml,
            _ => return None,
        })
    }

    fn is_native(&self, tag: TypeTag) -> bool {
        matches!(
            tag,
            TypeTag::Boolean
                | TypeTag::SmallInt
                | TypeTag::Integer
                | TypeTag::BigInt
                | TypeTag::Real
                | TypeTag::Double
        )
    }

    fn cast_to_text(&self, col_quoted: &str) -> String {
        format!("{col_quoted}::TEXT AS {col_quoted}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MySQL / MariaDB
// ─────────────────────────────────────────────────────────────────────────────

pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("`{}`", s.replace('`', "``"))
    }

    fn columns_query(&self, table: &str) -> String {
        format!(
            "select column_name, cast(ordinal_position as char), data_type, \
             cast(coalesce(character_maximum_length, numeric_precision, 0) as char), \
             cast(coalesce(numeric_scale, 0) as char), \
             is_nullable, \
             case when extra like '%auto_increment%' then 'YES' else 'NO' end, \
             coalesce(column_comment, '') \
             from information_schema.columns \
             where table_schema = database() and table_name = '{}' \
             order by ordinal_position",
            sql_string(table)
        )
    }

    fn primary_key_query(&self, table: &str) -> String {
        format!(
            "select column_name, constraint_name \
             from information_schema.key_column_usage \
             where table_schema = database() and table_name = '{}' \
               and constraint_name = 'PRIMARY' \
             order by ordinal_position",
            sql_string(table)
        )
    }

    fn tables_query(&self, pattern: &str) -> String {
        format!(
            "select table_name from information_schema.tables \
             where table_schema = database() and table_type = 'BASE TABLE' \
               and table_name like '{}' \
             order by table_name",
            sql_string(pattern)
        )
    }

    fn table_exists_query(&self, table: &str) -> String {
        format!(
            "select table_name from information_schema.tables \
             where table_schema = database() and table_name = '{}'",
            sql_string(table)
        )
    }

    fn map_type(&self, catalog_type: &str) -> Option<TypeTag> {
        Some(match catalog_type {
            "tinyint" => TypeTag::TinyInt,
            "smallint" | "year" => TypeTag::SmallInt,
            "int" | "mediumint" => TypeTag::Integer,
            "bigint" => TypeTag::BigInt,
            "decimal" => TypeTag::Decimal,
            "numeric" => TypeTag::Numeric,
            "float" => TypeTag::Float,
            "double" => TypeTag::Double,
            "bit" => TypeTag::Bit,
            "char" => TypeTag::Char,
            "varchar" => TypeTag::Varchar,
            "enum" | "set" => TypeTag::Varchar,
            "tinytext" | "text" | "mediumtext" | "longtext" => TypeTag::Clob,
            "json" => TypeTag::Clob,
            "date" => TypeTag::Date,
            "time" => TypeTag::Time,
            "datetime" | "timestamp" => TypeTag::Timestamp,
            "binary" => TypeTag::Binary,
            "varbinary" => TypeTag::VarBinary,
            "tinyblob" | "blob" | "mediumblob" | "longblob" => TypeTag::Blob,
            _ => return None,
        })
    }

    fn is_native(&self, tag: TypeTag) -> bool {
        // tinyint and smallint arrive in formats AnyRow cannot decode
        // reliably, so they go through the text cast like everything else.
        matches!(
            tag,
            TypeTag::Integer | TypeTag::BigInt | TypeTag::Float | TypeTag::Double
        )
    }

    fn cast_to_text(&self, col_quoted: &str) -> String {
        // CAST(col AS CHAR) and CONVERT(col USING utf8mb4) both reach the
        // client as BLOB; the row decoder reads raw bytes and reinterprets.
        format!("CONVERT({col_quoted} USING utf8mb4) AS {col_quoted}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite
// ─────────────────────────────────────────────────────────────────────────────

pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }

    fn columns_query(&self, table: &str) -> String {
        // Declared types carry their size inline ("varchar(30)"); the
        // caller splits them with split_declared_type.
        format!(
            "select name, cast(cid + 1 as text), type, '0', '0', \
             case when \"notnull\" = 0 then 'YES' else 'NO' end, 'NO', '' \
             from pragma_table_info('{}') order by cid",
            sql_string(table)
        )
    }

    fn primary_key_query(&self, table: &str) -> String {
        format!(
            "select name, '' from pragma_table_info('{}') where pk > 0 order by pk",
            sql_string(table)
        )
    }

    fn tables_query(&self, pattern: &str) -> String {
        format!(
            "select name from sqlite_master \
             where type = 'table' and name not like 'sqlite_%' and name like '{}' \
             order by name",
            sql_string(pattern)
        )
    }

    fn table_exists_query(&self, table: &str) -> String {
        format!(
            "select name from sqlite_master where type = 'table' and name = '{}'",
            sql_string(table)
        )
    }

    fn map_type(&self, catalog_type: &str) -> Option<TypeTag> {
        let exact = match catalog_type {
            "int" | "integer" | "mediumint" => Some(TypeTag::Integer),
            "tinyint" => Some(TypeTag::TinyInt),
            "smallint" => Some(TypeTag::SmallInt),
            "bigint" | "unsigned big int" => Some(TypeTag::BigInt),
            "real" => Some(TypeTag::Real),
            "float" => Some(TypeTag::Float),
            "double" | "double precision" => Some(TypeTag::Double),
            "numeric" => Some(TypeTag::Numeric),
            "decimal" => Some(TypeTag::Decimal),
            "boolean" | "bool" => Some(TypeTag::Boolean),
            "char" | "nchar" | "character" => Some(TypeTag::Char),
            "varchar" | "nvarchar" | "varying character" => Some(TypeTag::Varchar),
            "text" => Some(TypeTag::LongVarchar),
            "clob" => Some(TypeTag::Clob),
            "blob" | "" => Some(TypeTag::Blob),
            "date" => Some(TypeTag::Date),
            "time" => Some(TypeTag::Time),
            "datetime" | "timestamp" => Some(TypeTag::Timestamp),
            _ => None,
        };
        // SQLite accepts arbitrary declared types; fall back to the
        // affinity rules when nothing matched exactly.
        exact.or_else(|| {
            if catalog_type.contains("int") {
                Some(TypeTag::Integer)
            } else if catalog_type.contains("char")
                || catalog_type.contains("clob")
                || catalog_type.contains("text")
            {
                Some(TypeTag::Varchar)
            } else if catalog_type.contains("blob") {
                Some(TypeTag::Blob)
            } else if catalog_type.contains("real")
                || catalog_type.contains("floa")
                || catalog_type.contains("doub")
            {
                Some(TypeTag::Double)
            } else {
                None
            }
        })
    }

    fn is_native(&self, tag: TypeTag) -> bool {
        tag.is_integer() || tag.is_float() || tag == TypeTag::Boolean
    }

    fn cast_to_text(&self, col_quoted: &str) -> String {
        format!("CAST({col_quoted} AS TEXT) AS {col_quoted}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the dialect from a driver name string. MariaDB shares MySQL's
/// wire protocol and catalog layout; unknown names default to PostgreSQL.
pub fn from_driver(driver: &str) -> Box<dyn Dialect> {
    match driver {
        "mysql" | "mariadb" => Box::new(MysqlDialect),
        "sqlite" => Box::new(SqliteDialect),
        _ => Box::new(PostgresDialect),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, tag: TypeTag) -> Column {
        Column {
            position: 1,
            name: name.to_string(),
            tag,
            size: 0,
            scale: 0,
            nullable: true,
            auto_increment: false,
            remarks: None,
        }
    }

    #[test]
    fn quote_ident_per_dialect() {
        assert_eq!(PostgresDialect.quote_ident("my_table"), r#""my_table""#);
        assert_eq!(PostgresDialect.quote_ident(r#"ta"ble"#), r#""ta""ble""#);
        assert_eq!(MysqlDialect.quote_ident("my_table"), "`my_table`");
        assert_eq!(MysqlDialect.quote_ident("ta`ble"), "`ta``ble`");
        assert_eq!(SqliteDialect.quote_ident("my_table"), r#""my_table""#);
    }

    #[test]
    fn bind_markers() {
        assert_eq!(PostgresDialect.bind_marker(1), "$1");
        assert_eq!(PostgresDialect.bind_marker(3), "$3");
        assert_eq!(MysqlDialect.bind_marker(3), "?");
        assert_eq!(SqliteDialect.bind_marker(1), "?");
    }

    #[test]
    fn select_expr_casts_only_non_native_types() {
        let d = PostgresDialect;
        assert_eq!(d.select_expr(&column("id", TypeTag::Integer)), r#""id""#);
        assert_eq!(
            d.select_expr(&column("price", TypeTag::Numeric)),
            r#""price"::TEXT AS "price""#
        );
        // binary columns are decoded as raw bytes, never cast
        assert_eq!(d.select_expr(&column("payload", TypeTag::Blob)), r#""payload""#);

        let m = MysqlDialect;
        assert_eq!(
            m.select_expr(&column("is_active", TypeTag::TinyInt)),
            "CONVERT(`is_active` USING utf8mb4) AS `is_active`"
        );
        assert_eq!(m.select_expr(&column("n", TypeTag::BigInt)), "`n`");

        let s = SqliteDialect;
        assert_eq!(
            s.select_expr(&column("price", TypeTag::Numeric)),
            r#"CAST("price" AS TEXT) AS "price""#
        );
    }

    #[test]
    fn postgres_maps_catalog_types() {
        let d = PostgresDialect;
        assert_eq!(d.map_type("character varying"), Some(TypeTag::Varchar));
        assert_eq!(d.map_type("double precision"), Some(TypeTag::Double));
        assert_eq!(d.map_type("bytea"), Some(TypeTag::Blob));
        assert_eq!(d.map_type("timestamp with time zone"), Some(TypeTag::TimestampWithTimezone));
        assert_eq!(d.map_type("point"), None);
    }

    #[test]
    fn mysql_maps_catalog_types() {
        let d = MysqlDialect;
        assert_eq!(d.map_type("tinyint"), Some(TypeTag::TinyInt));
        assert_eq!(d.map_type("longtext"), Some(TypeTag::Clob));
        assert_eq!(d.map_type("varbinary"), Some(TypeTag::VarBinary));
        assert_eq!(d.map_type("geometry"), None);
    }

    #[test]
    fn sqlite_falls_back_to_affinity_rules() {
        let d = SqliteDialect;
        assert_eq!(d.map_type("integer"), Some(TypeTag::Integer));
        assert_eq!(d.map_type("unsigned int"), Some(TypeTag::Integer));
        assert_eq!(d.map_type("varying character"), Some(TypeTag::Varchar));
        assert_eq!(d.map_type(""), Some(TypeTag::Blob));
        assert_eq!(d.map_type("geometry"), None);
    }

    #[test]
    fn split_declared_type_handles_sizes() {
        assert_eq!(split_declared_type("varchar(30)"), ("varchar".to_string(), 30, 0));
        assert_eq!(split_declared_type("NUMERIC(10, 2)"), ("numeric".to_string(), 10, 2));
        assert_eq!(split_declared_type("text"), ("text".to_string(), 0, 0));
    }

    #[test]
    fn introspection_queries_escape_quotes() {
        let q = PostgresDialect.columns_query("ta'ble");
        assert!(q.contains("lower('ta''ble')"), "{q}");
        let q = SqliteDialect.primary_key_query("ta'ble");
        assert!(q.contains("pragma_table_info('ta''ble')"), "{q}");
    }

    #[test]
    fn from_driver_resolves_names() {
        assert_eq!(from_driver("postgres").name(), "postgres");
        assert_eq!(from_driver("mysql").name(), "mysql");
        assert_eq!(from_driver("mariadb").name(), "mysql");
        assert_eq!(from_driver("sqlite").name(), "sqlite");
        assert_eq!(from_driver("unknown").name(), "postgres");
    }
}

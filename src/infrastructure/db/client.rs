use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Column as _, Connection, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::ports::DataSource;
use crate::domain::schema::{Column, PrimaryKey, TableSchema};
use crate::domain::snapshot::Snapshot;
use crate::domain::sql_type::{BindValue, TypeTag};
use crate::infrastructure::config::DbConfig;
use crate::infrastructure::db::dialect::{from_driver, split_declared_type, Dialect};

/// sqlx-backed implementation of the [`DataSource`] port.
///
/// Holds a single pinned connection so that `execute`, `commit` and
/// `rollback` act on one session. The session always runs inside an
/// explicit transaction — commit and rollback close it and immediately
/// open the next one, keeping transaction boundaries a caller decision.
pub struct SqlxDataSource {
    conn: Mutex<AnyConnection>,
    dialect: Box<dyn Dialect>,
}

/// Connect to the database described in `cfg`.
pub async fn connect(cfg: &DbConfig) -> Result<SqlxDataSource> {
    sqlx::any::install_default_drivers();

    let mut conn = AnyConnection::connect(&cfg.url())
        .await
        .with_context(|| format!("failed to connect to {} (driver: {})", cfg.dbname, cfg.driver))?;

    sqlx::query("BEGIN")
        .execute(&mut conn)
        .await
        .context("failed to open the initial transaction")?;

    debug!(
        "connected to {}/{} via {} driver",
        cfg.host, cfg.dbname, cfg.driver
    );

    Ok(SqlxDataSource {
        conn: Mutex::new(conn),
        dialect: from_driver(&cfg.driver),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Read a column as nullable text, handling MySQL's habit of returning
/// cast/converted columns as BLOB to `sqlx::AnyRow`.
fn text_value(row: &AnyRow, idx: usize) -> Result<Option<String>> {
    let type_name = row.column(idx).type_info().name();
    if type_name == "BLOB" {
        let bytes: Option<Vec<u8>> = row.try_get(idx)?;
        Ok(bytes.map(|b| String::from_utf8(b).unwrap_or_default()))
    } else {
        Ok(row.try_get(idx)?)
    }
}

/// Non-null variant for introspection result sets.
fn text_column(row: &AnyRow, idx: usize) -> Result<String> {
    Ok(text_value(row, idx)?.unwrap_or_default())
}

/// Decode one cursor column straight into canonical text.
///
/// Native tags use the driver's typed decoding; binary tags read raw bytes
/// and become base64; everything else arrived as text (via the dialect
/// cast) and is canonicalized client-side.
fn decode_column(
    row: &AnyRow,
    idx: usize,
    column: &Column,
    dialect: &dyn Dialect,
) -> Result<Option<String>> {
    let tag = column.tag;
    if tag.is_binary() {
        let bytes: Option<Vec<u8>> = row.try_get(idx)?;
        return Ok(bytes.map(|b| BASE64.encode(b)));
    }
    if dialect.is_native(tag) {
        return Ok(match tag {
            TypeTag::Bit | TypeTag::Boolean => row
                .try_get::<Option<bool>, _>(idx)?
                .map(|v| v.to_string()),
            TypeTag::BigInt => row.try_get::<Option<i64>, _>(idx)?.map(|v| v.to_string()),
            t if t.is_integer() => row.try_get::<Option<i32>, _>(idx)?.map(|v| v.to_string()),
            TypeTag::Real => row.try_get::<Option<f32>, _>(idx)?.map(|v| v.to_string()),
            t if t.is_float() => row.try_get::<Option<f64>, _>(idx)?.map(|v| v.to_string()),
            _ => text_value(row, idx)?,
        });
    }
    Ok(text_value(row, idx)?.map(|s| tag.canonicalize(&s)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Port implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl DataSource for SqlxDataSource {
    async fn fetch(&self, table: &str, filter: Option<&str>) -> Result<Snapshot> {
        let schema = self.table_schema(table).await?;

        let exprs: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| self.dialect.select_expr(c))
            .collect();
        let mut sql = format!(
            "select {} from {}",
            exprs.join(", "),
            self.dialect.quote_ident(schema.name())
        );
        if let Some(clause) = filter {
            sql.push_str(" where ");
            sql.push_str(clause);
        }
        if schema.has_primary_key() {
            let order: Vec<String> = schema
                .pk_columns()
                .map(|c| self.dialect.quote_ident(&c.name))
                .collect();
            sql.push_str(" order by ");
            sql.push_str(&order.join(", "));
        }
        debug!(sql, "fetching rows");

        let rows = {
            let mut conn = self.conn.lock().await;
            sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .with_context(|| format!("failed to query table {table}"))?
        };

        let columns = schema.columns().to_vec();
        let mut snapshot = Snapshot::new(schema, filter.map(str::to_string));
        // Columns whose values could not be decoded; warned about once and
        // captured as null so one odd column does not sink the whole fetch.
        let mut degraded: HashSet<String> = HashSet::new();

        for (count, row) in rows.iter().enumerate() {
            if (count + 1) % 100_000 == 0 {
                info!(table, rows = count + 1, "rows fetched so far");
            }
            let mut values = Vec::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let value = match decode_column(row, idx, column, self.dialect.as_ref()) {
                    Ok(v) => v,
                    Err(e) => {
                        if degraded.insert(column.name.clone()) {
                            warn!(
                                table,
                                column = %column.name,
                                "could not decode column, capturing as null: {e:#}"
                            );
                        }
                        None
                    }
                };
                values.push(value);
            }
            snapshot.add_row(values)?;
        }
        info!(table, rows = snapshot.len(), "fetch completed");
        Ok(snapshot)
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let mut conn = self.conn.lock().await;

        let sql = self.dialect.columns_query(table);
        debug!(sql, "introspecting columns");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("failed to read column metadata for table {table}"))?;
        if rows.is_empty() {
            bail!("table {table} does not exist");
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_column(row, 0)?;
            let position: u32 = text_column(row, 1)?
                .trim()
                .parse()
                .with_context(|| format!("bad ordinal position for column {name}"))?;
            let declared = text_column(row, 2)?;
            let size: u32 = text_column(row, 3)?.trim().parse().unwrap_or(0);
            let scale: i32 = text_column(row, 4)?.trim().parse().unwrap_or(0);
            let nullable = text_column(row, 5)?.eq_ignore_ascii_case("yes");
            let auto_increment = text_column(row, 6)?.eq_ignore_ascii_case("yes");
            let remarks = Some(text_column(row, 7)?).filter(|r| !r.is_empty());

            let (base, declared_size, declared_scale) = split_declared_type(&declared);
            let tag = match self.dialect.map_type(&base) {
                Some(tag) => tag,
                None => {
                    warn!(
                        table,
                        column = %name,
                        catalog_type = %declared,
                        "unsupported column type; capturing as text"
                    );
                    TypeTag::Other
                }
            };
            columns.push(Column {
                position,
                name,
                tag,
                size: if size != 0 { size } else { declared_size },
                scale: if scale != 0 { scale } else { declared_scale },
                nullable,
                auto_increment,
                remarks,
            });
        }

        let pk_sql = self.dialect.primary_key_query(table);
        debug!(sql = pk_sql, "introspecting primary key");
        let pk_rows = sqlx::query(&pk_sql)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("failed to read primary key for table {table}"))?;

        let mut pk_name = None;
        let mut pk_columns = Vec::with_capacity(pk_rows.len());
        for row in &pk_rows {
            pk_columns.push(text_column(row, 0)?);
            if pk_name.is_none() {
                pk_name = Some(text_column(row, 1)?).filter(|n| !n.is_empty());
            }
        }

        TableSchema::new(
            table,
            columns,
            PrimaryKey {
                name: pk_name,
                columns: pk_columns,
            },
            vec![],
        )
    }

    async fn table_names(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let sql = self.dialect.tables_query(pattern.unwrap_or("%"));
        debug!(sql, "listing tables");
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .context("failed to list tables")?;
        rows.iter().map(|r| text_column(r, 0)).collect()
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = self.dialect.table_exists_query(table);
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("failed to check whether table {table} exists"))?;
        Ok(!rows.is_empty())
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let sql = schema.create_table_sql();
        info!(table = schema.name(), "creating table");
        self.execute(&sql).await.map(|_| ())
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql, "executing");
        let mut conn = self.conn.lock().await;
        let result = sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed statement: {sql}"))?;
        Ok(result.rows_affected())
    }

    async fn execute_bound(&self, sql: &str, params: &[BindValue]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                BindValue::Null => query.bind(None::<String>),
                BindValue::Bool(b) => query.bind(*b),
                BindValue::Int(i) => query.bind(*i),
                BindValue::Float(f) => query.bind(*f),
                BindValue::Text(s) => query.bind(s.clone()),
                BindValue::Bytes(b) => query.bind(b.clone()),
            };
        }
        let mut conn = self.conn.lock().await;
        let result = query
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed statement: {sql}"))?;
        Ok(result.rows_affected())
    }

    async fn commit(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .context("commit failed")?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .context("failed to open the next transaction")?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .context("rollback failed")?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .context("failed to open the next transaction")?;
        Ok(())
    }

    fn bind_marker(&self, index: usize) -> String {
        self.dialect.bind_marker(index)
    }
}

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Type taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Closed enumeration of the SQL column types rowsync understands.
///
/// Every behavior that historically branched on a numeric type code lives
/// here as a method, so there is exactly one fallback path for types we
/// cannot do better than treat as opaque text ([`TypeTag::Other`]).
///
/// The tag decides three representations of a column value:
/// - the **canonical text** stored inside a [`Snapshot`](crate::Snapshot)
///   record and used for equality comparison,
/// - the **bound parameter** used when applying a change set through a
///   prepared statement ([`TypeTag::bind_value`]),
/// - the **SQL literal** used in generated apply/undo scripts
///   ([`TypeTag::literal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    NChar,
    NVarchar,
    LongNVarchar,
    Date,
    Time,
    Timestamp,
    TimeWithTimezone,
    TimestampWithTimezone,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Clob,
    NClob,
    Boolean,
    RowId,
    Xml,
    Other,
}

/// A value parsed out of canonical text, ready to be bound to a prepared
/// statement through the data-access port.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl TypeTag {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeTag::TinyInt | TypeTag::SmallInt | TypeTag::Integer | TypeTag::BigInt
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeTag::Float | TypeTag::Real | TypeTag::Double)
    }

    pub fn is_decimal(self) -> bool {
        matches!(self, TypeTag::Numeric | TypeTag::Decimal)
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            TypeTag::Binary | TypeTag::VarBinary | TypeTag::LongVarBinary | TypeTag::Blob
        )
    }

    /// Columns of this tag are right-aligned in tabular diff output.
    pub fn right_aligned(self) -> bool {
        self.is_integer() || self.is_float() || self.is_decimal() || self == TypeTag::Boolean
    }

    // ── Canonical text ──────────────────────────────────────────────────────

    /// Normalize raw text (driver output or a hand-edited snapshot file)
    /// into the canonical form used for storage and comparison.
    ///
    /// Decimals lose grouping and trailing zeros, dates become
    /// `YYYY-MM-DD`, times `HH:MM:SS[.fff]`, timestamps
    /// `YYYY-MM-DD HH:MM:SS[.fff]`, booleans `true`/`false`. Binary values
    /// are expected to already be base64 text and pass through unchanged,
    /// as does anything this function cannot parse (best-effort capture).
    pub fn canonicalize(self, raw: &str) -> String {
        match self {
            t if t.is_integer() => match raw.trim().parse::<i128>() {
                Ok(n) => n.to_string(),
                Err(_) => raw.trim().to_string(),
            },
            t if t.is_float() || t.is_decimal() => trim_decimal(raw),
            TypeTag::Bit | TypeTag::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "y" | "yes" => "true".to_string(),
                "false" | "f" | "0" | "n" | "no" => "false".to_string(),
                _ => raw.trim().to_string(),
            },
            TypeTag::Date => match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(d) => d.format("%Y-%m-%d").to_string(),
                Err(_) => raw.trim().to_string(),
            },
            TypeTag::Time => match parse_time(raw.trim()) {
                Some(t) => format!("{}{}", t.format("%H:%M:%S"), fraction_suffix(t.nanosecond())),
                None => raw.trim().to_string(),
            },
            TypeTag::Timestamp => match parse_timestamp(raw.trim()) {
                Some(ts) => format!(
                    "{}{}",
                    ts.format("%Y-%m-%d %H:%M:%S"),
                    fraction_suffix(ts.nanosecond())
                ),
                None => raw.trim().to_string(),
            },
            _ => raw.to_string(),
        }
    }

    // ── Bound parameters ────────────────────────────────────────────────────

    /// Parse canonical text into a typed bind parameter.
    ///
    /// `None` binds SQL NULL. Tags with no better mapping — temporal types
    /// (the driver coerces their ISO text), arbitrary-precision decimals,
    /// CLOBs and every unrecognized catalog type — bind as opaque text.
    /// That fallback is deliberate: such columns round-trip unchanged, they
    /// are just never decomposed into a richer client-side value.
    pub fn bind_value(self, text: Option<&str>) -> Result<BindValue> {
        let Some(value) = text else {
            return Ok(BindValue::Null);
        };
        match self {
            t if t.is_integer() => Ok(BindValue::Int(
                value
                    .parse::<i64>()
                    .with_context(|| format!("invalid integer value {value:?}"))?,
            )),
            t if t.is_float() => Ok(BindValue::Float(
                value
                    .parse::<f64>()
                    .with_context(|| format!("invalid floating point value {value:?}"))?,
            )),
            TypeTag::Bit | TypeTag::Boolean => match value {
                "true" => Ok(BindValue::Bool(true)),
                "false" => Ok(BindValue::Bool(false)),
                other => anyhow::bail!("invalid boolean value {other:?}"),
            },
            t if t.is_binary() => Ok(BindValue::Bytes(
                BASE64
                    .decode(value)
                    .with_context(|| format!("invalid base64 value for binary column: {value:?}"))?,
            )),
            _ => Ok(BindValue::Text(value.to_string())),
        }
    }

    // ── SQL literals ────────────────────────────────────────────────────────

    /// Render canonical text as a SQL literal for a generated script.
    ///
    /// Null becomes the `NULL` keyword, temporal values typed literals,
    /// binary/BLOB values `X'…'` hex blobs, numeric and boolean values bare
    /// tokens, everything else a single-quoted string with `''` escaping.
    pub fn literal(self, text: Option<&str>) -> String {
        let Some(value) = text else {
            return "NULL".to_string();
        };
        match self {
            TypeTag::Date => format!("DATE'{value}'"),
            TypeTag::Time => format!("TIME'{value}'"),
            TypeTag::Timestamp => format!("TIMESTAMP'{value}'"),
            t if t.is_binary() => match BASE64.decode(value) {
                Ok(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
                // Not base64 after all — fall back to a plain quoted string.
                Err(_) => quoted(value),
            },
            t if t.is_integer() || t.is_float() || t.is_decimal() => value.to_string(),
            TypeTag::Boolean => value.to_string(),
            _ => quoted(value),
        }
    }

    // ── DDL ─────────────────────────────────────────────────────────────────

    /// The type fragment of a column definition in `create table`.
    ///
    /// `size`/`scale` come from the column metadata; a scale of `-127`
    /// marks an unscaled Oracle number and is omitted, as is a zero size.
    pub fn ddl(self, size: u32, scale: i32) -> String {
        match self {
            TypeTag::Bit => "bit".to_string(),
            TypeTag::TinyInt => "tinyint".to_string(),
            TypeTag::SmallInt => "smallint".to_string(),
            TypeTag::Integer => "integer".to_string(),
            TypeTag::BigInt => "bigint".to_string(),
            TypeTag::Float => "float".to_string(),
            TypeTag::Real => "real".to_string(),
            TypeTag::Double => "double".to_string(),
            TypeTag::Numeric => {
                if size == 0 {
                    "numeric".to_string()
                } else if scale != 0 && scale != -127 {
                    format!("numeric ({size}, {scale})")
                } else {
                    format!("numeric ({size})")
                }
            }
            TypeTag::Decimal => "decimal".to_string(),
            TypeTag::Char => "char".to_string(),
            TypeTag::Varchar => format!("varchar({size})"),
            TypeTag::LongVarchar => "longvarchar".to_string(),
            TypeTag::NChar => "nchar".to_string(),
            TypeTag::NVarchar => "nvarchar".to_string(),
            TypeTag::LongNVarchar => "longnvarchar".to_string(),
            TypeTag::Date => "date".to_string(),
            TypeTag::Time => "time".to_string(),
            TypeTag::Timestamp => "timestamp".to_string(),
            TypeTag::TimeWithTimezone => "time_with_timezone".to_string(),
            TypeTag::TimestampWithTimezone => "timestamp_with_timezone".to_string(),
            TypeTag::Binary => "binary".to_string(),
            TypeTag::VarBinary => "varbinary".to_string(),
            TypeTag::LongVarBinary => "longvarbinary".to_string(),
            TypeTag::Blob => "blob".to_string(),
            TypeTag::Clob => "clob".to_string(),
            TypeTag::NClob => "nclob".to_string(),
            TypeTag::Boolean => "boolean".to_string(),
            TypeTag::RowId => "rowid".to_string(),
            TypeTag::Xml => "sqlxml".to_string(),
            TypeTag::Other => "other".to_string(),
        }
    }

    // ── Snapshot file values ────────────────────────────────────────────────

    /// Encode canonical text as the type-correct JSON value used in a
    /// persisted snapshot file: integers as JSON integers, floats and
    /// decimals as JSON numbers (falling back to a string when the text
    /// does not survive an f64 round-trip), booleans as JSON booleans,
    /// everything else as strings, null as JSON null.
    pub fn json_value(self, text: Option<&str>) -> Value {
        let Some(value) = text else {
            return Value::Null;
        };
        match self {
            t if t.is_integer() => match value.parse::<i64>() {
                Ok(n) => Value::Number(n.into()),
                Err(_) => Value::String(value.to_string()),
            },
            t if t.is_float() || t.is_decimal() => decimal_json(value),
            TypeTag::Bit | TypeTag::Boolean => match value {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => Value::String(other.to_string()),
            },
            _ => Value::String(value.to_string()),
        }
    }

    /// Inverse of [`TypeTag::json_value`]: turn a snapshot-file JSON value
    /// back into canonical text.
    pub fn canonical_from_json(self, value: &Value) -> Result<Option<String>> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(b.to_string())),
            Value::Number(n) => Ok(Some(self.canonicalize(&n.to_string()))),
            Value::String(s) => Ok(Some(self.canonicalize(s))),
            other => anyhow::bail!("unsupported JSON value in snapshot record: {other}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Strip grouping-free decimal text of its trailing fraction zeros.
/// Exponent notation is left untouched.
fn trim_decimal(raw: &str) -> String {
    let text = raw.trim();
    if text.contains(['e', 'E']) || !text.contains('.') {
        return text.to_string();
    }
    let text = text.trim_end_matches('0');
    let text = text.strip_suffix('.').unwrap_or(text);
    match text {
        "" | "-" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

fn fraction_suffix(nanos: u32) -> String {
    if nanos == 0 {
        String::new()
    } else {
        format!(".{}", format!("{nanos:09}").trim_end_matches('0'))
    }
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn decimal_json(value: &str) -> Value {
    if !value.contains('.') {
        if let Ok(n) = value.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            // Only keep the number form when it reproduces the canonical
            // text exactly; otherwise the precision would silently change.
            if n.to_string() == value {
                return Value::Number(n);
            }
        }
    }
    Value::String(value.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

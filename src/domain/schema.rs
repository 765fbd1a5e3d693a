use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::domain::sql_type::TypeTag;

// ─────────────────────────────────────────────────────────────────────────────
// Columns and keys
// ─────────────────────────────────────────────────────────────────────────────

/// One column of a table, as read from the catalog or a snapshot file.
/// Immutable once the owning [`TableSchema`] is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// 1-based ordinal position in the table.
    pub position: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub tag: TypeTag,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub scale: i32,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Column {
    /// The type fragment of this column's `create table` definition.
    pub fn ddl(&self) -> String {
        self.tag.ddl(self.size, self.scale)
    }
}

/// The primary key of a table. `columns` is kept sorted by column ordinal
/// position (not declaration order) so that record keys extracted from two
/// snapshots of the same table always line up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
}

/// Foreign-key descriptor. Metadata only — rowsync never enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub fk_column: String,
    pub pk_table: String,
    pub pk_column: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// TableSchema
// ─────────────────────────────────────────────────────────────────────────────

/// The shape of one table: ordered columns, primary key and foreign-key
/// metadata, with the name→ordinal and primary-key→ordinal mappings derived
/// once at construction.
///
/// A schema is an immutable value object; every record of a snapshot
/// resolves its column positions and types through a shared handle to one
/// of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema")]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: PrimaryKey,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    foreign_keys: Vec<ForeignKey>,
    #[serde(skip)]
    column_index: HashMap<String, usize>,
    #[serde(skip)]
    pk_indices: Vec<usize>,
}

impl TableSchema {
    pub fn new(
        name: impl Into<String>,
        mut columns: Vec<Column>,
        primary_key: PrimaryKey,
        foreign_keys: Vec<ForeignKey>,
    ) -> Result<Self> {
        let name = name.into();
        columns.sort_by_key(|c| c.position);

        let mut column_index = HashMap::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            if column_index.insert(col.name.clone(), i).is_some() {
                bail!("duplicate column {} in table {}", col.name, name);
            }
        }

        for pk_col in &primary_key.columns {
            if !column_index.contains_key(pk_col) {
                bail!("primary key column {pk_col} does not exist in table {name}");
            }
        }

        // Key columns in ordinal order, regardless of constraint declaration
        // order, so keys compare positionally across snapshots.
        let mut pk_columns = primary_key.columns;
        pk_columns.sort_by_key(|c| column_index[c]);
        let pk_indices = pk_columns.iter().map(|c| column_index[c]).collect();
        let primary_key = PrimaryKey {
            name: primary_key.name,
            columns: pk_columns,
        };

        Ok(TableSchema {
            name,
            columns,
            primary_key,
            foreign_keys,
            column_index,
            pk_indices,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// 0-based index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.columns.is_empty()
    }

    /// 0-based ordinals of the primary-key columns, in ordinal order.
    pub fn pk_indices(&self) -> &[usize] {
        &self.pk_indices
    }

    pub fn pk_columns(&self) -> impl Iterator<Item = &Column> {
        self.pk_indices.iter().map(|&i| &self.columns[i])
    }

    pub fn non_pk_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.pk_indices.contains(i))
            .map(|(_, c)| c)
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// `true` when both schemas list the same column names in the same
    /// positions. Types are deliberately not compared — values are held as
    /// canonical text, so a size or remark drift does not affect the diff.
    pub fn same_columns(&self, other: &TableSchema) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.name == b.name)
    }

    /// Deterministic `create table` statement: columns in ordinal order,
    /// types rendered through the codec, primary-key clause appended when
    /// the table has one.
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ddl()))
            .collect::<Vec<_>>()
            .join(", ");
        if self.has_primary_key() {
            format!(
                "create table {} ({}, primary key ({}))",
                self.name,
                columns,
                self.primary_key.columns.join(", ")
            )
        } else {
            format!("create table {} ({})", self.name, columns)
        }
    }
}

// Deserialization goes through the constructor so the derived indices are
// rebuilt and the invariants re-checked on every load.
#[derive(Deserialize)]
struct RawSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: PrimaryKey,
    #[serde(default)]
    foreign_keys: Vec<ForeignKey>,
}

impl TryFrom<RawSchema> for TableSchema {
    type Error = anyhow::Error;

    fn try_from(raw: RawSchema) -> Result<Self> {
        TableSchema::new(raw.name, raw.columns, raw.primary_key, raw.foreign_keys)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

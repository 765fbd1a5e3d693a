use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::domain::changeset::ChangeSet;
use crate::domain::schema::TableSchema;

// ─────────────────────────────────────────────────────────────────────────────
// Keys and records
// ─────────────────────────────────────────────────────────────────────────────

/// The identity of a row: its primary-key values in column ordinal order.
/// Two keys are equal iff every positional value is equal, nulls included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Vec<Option<String>>);

impl Key {
    pub fn values(&self) -> &[Option<String>] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.0.iter().map(|v| v.as_deref().unwrap_or("NULL")).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Borrowed view of one snapshot row. Records do not own their schema —
/// they resolve column positions and types through the snapshot's shared
/// schema handle.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    schema: &'a TableSchema,
    values: &'a [Option<String>],
}

impl<'a> RecordRef<'a> {
    pub fn schema(&self) -> &'a TableSchema {
        self.schema
    }

    /// Canonical text of a column by name; `None` for SQL NULL (and for a
    /// column the schema does not know).
    pub fn value(&self, column: &str) -> Option<&'a str> {
        self.schema
            .column_index(column)
            .and_then(|i| self.values[i].as_deref())
    }

    pub fn values(&self) -> &'a [Option<String>] {
        self.values
    }

    pub fn key(&self) -> Key {
        Key(self
            .schema
            .pk_indices()
            .iter()
            .map(|&i| self.values[i].clone())
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// A captured, keyed set of rows for one table, optionally scoped by a
/// `where` filter.
///
/// Built row by row while reading a cursor (or wholesale from a snapshot
/// file), then treated as read-only. Every value is canonical text (see
/// [`TypeTag`](crate::TypeTag)), which is what makes rows of heterogeneous
/// column types comparable and serializable uniformly. An empty snapshot is
/// valid — it states that the filtered view of the table holds no rows.
#[derive(Debug, Clone)]
pub struct Snapshot {
    schema: Arc<TableSchema>,
    filter: Option<String>,
    rows: Vec<Vec<Option<String>>>,
    index: HashMap<Key, usize>,
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        *self.schema == *other.schema && self.filter == other.filter && self.rows == other.rows
    }
}

impl Snapshot {
    pub fn new(schema: TableSchema, filter: Option<String>) -> Self {
        Self::with_schema(Arc::new(schema), filter)
    }

    fn with_schema(schema: Arc<TableSchema>, filter: Option<String>) -> Self {
        Snapshot {
            schema,
            filter,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        self.schema.name()
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row of canonical text values, one per schema column.
    pub fn add_row(&mut self, values: Vec<Option<String>>) -> Result<()> {
        if values.len() != self.schema.column_count() {
            bail!(
                "row has {} values but table {} has {} columns",
                values.len(),
                self.table_name(),
                self.schema.column_count()
            );
        }
        let key = Key(self
            .schema
            .pk_indices()
            .iter()
            .map(|&i| values[i].clone())
            .collect());
        self.rows.push(values);
        self.index.insert(key, self.rows.len() - 1);
        Ok(())
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn record(&self, key: &Key) -> Option<RecordRef<'_>> {
        self.index.get(key).map(|&i| RecordRef {
            schema: &self.schema,
            values: &self.rows[i],
        })
    }

    /// Rows in insertion order (the order they were read from the cursor or
    /// the snapshot file).
    pub fn records(&self) -> impl Iterator<Item = RecordRef<'_>> {
        self.rows.iter().map(|r| RecordRef {
            schema: &self.schema,
            values: r,
        })
    }

    /// Row keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.records().map(|r| r.key())
    }

    // ── Delta ───────────────────────────────────────────────────────────────

    /// Compare this snapshot (the reference, i.e. the desired state) with
    /// `target` (the current state) and produce the change set that brings
    /// the target in line: rows to insert (only in the reference), rows to
    /// update (in both but unequal outside `ignore_columns`), rows to
    /// delete (only in the target).
    ///
    /// Fails fast when the table names differ, when the table has no
    /// primary key, or when a primary-key column is listed in
    /// `ignore_columns`. A differing column set is reported as a warning
    /// and the diff proceeds — that situation usually means schema drift
    /// the caller still wants visibility into.
    pub fn delta(self, target: Snapshot, ignore_columns: &[String]) -> Result<ChangeSet> {
        if !self.table_name().eq_ignore_ascii_case(target.table_name()) {
            bail!(
                "cannot diff snapshots of different tables: {} vs {}",
                self.table_name(),
                target.table_name()
            );
        }
        if !self.schema.has_primary_key() {
            bail!(
                "table {} has no primary key; diffing it is unsupported",
                self.table_name()
            );
        }
        let mask = self.comparison_mask(ignore_columns)?;

        if !self.schema.same_columns(&target.schema) {
            let ours: Vec<&str> = self.schema.columns().iter().map(|c| c.name.as_str()).collect();
            let theirs: Vec<&str> =
                target.schema.columns().iter().map(|c| c.name.as_str()).collect();
            warn!(
                table = self.table_name(),
                reference = ?ours,
                found = ?theirs,
                "column names and positions differ between the snapshots"
            );
        }

        let delete_keys: Vec<Key> = target.keys().filter(|k| !self.contains_key(k)).collect();
        let insert_keys: Vec<Key> = self.keys().filter(|k| !target.contains_key(k)).collect();
        let update_keys: Vec<Key> = self
            .keys()
            .filter(|k| {
                target.record(k).is_some_and(|theirs| {
                    let ours = self.record(k).expect("key extracted from own rows");
                    !rows_equal(ours.values(), theirs.values(), mask.as_deref())
                })
            })
            .collect();

        Ok(ChangeSet::new(
            self,
            target,
            insert_keys,
            update_keys,
            delete_keys,
        ))
    }

    /// Per-column comparison mask: `false` marks an ignored column.
    /// Ignoring a primary-key column is a configuration error — key columns
    /// are the identity backbone of the diff. Names that match no column
    /// are skipped.
    fn comparison_mask(&self, ignore_columns: &[String]) -> Result<Option<Vec<bool>>> {
        if ignore_columns.is_empty() {
            return Ok(None);
        }
        for ignored in ignore_columns {
            if self.schema.pk_columns().any(|c| &c.name == ignored) {
                bail!("primary key columns can not be ignored: {ignored}");
            }
        }
        let mask = self
            .schema
            .columns()
            .iter()
            .map(|c| !ignore_columns.contains(&c.name))
            .collect();
        Ok(Some(mask))
    }

    // ── Grouped export ──────────────────────────────────────────────────────

    /// Partition this snapshot by the values of `columns`: one child
    /// snapshot per distinct value combination, each carrying a filter that
    /// re-selects exactly its rows. Returns the group values alongside each
    /// child, in deterministic (sorted) group order.
    pub fn split_by(&self, columns: &[String]) -> Result<Vec<(Vec<String>, Snapshot)>> {
        let indices: Vec<usize> = columns
            .iter()
            .map(|c| {
                self.schema.column_index(c).ok_or_else(|| {
                    anyhow!("column {c} does not exist in table {}", self.table_name())
                })
            })
            .collect::<Result<_>>()?;

        let mut groups: BTreeMap<Vec<Option<String>>, Vec<usize>> = BTreeMap::new();
        for (row_id, row) in self.rows.iter().enumerate() {
            let group: Vec<Option<String>> = indices.iter().map(|&i| row[i].clone()).collect();
            groups.entry(group).or_default().push(row_id);
        }

        let mut result = Vec::with_capacity(groups.len());
        for (group, row_ids) in groups {
            let mut conditions: Vec<String> = Vec::with_capacity(columns.len() + 1);
            if let Some(filter) = &self.filter {
                conditions.push(filter.clone());
            }
            for (i, column) in columns.iter().enumerate() {
                let tag = self.schema.column(column).expect("index resolved above").tag;
                conditions.push(format!("{} = {}", column, tag.literal(group[i].as_deref())));
            }
            let mut child =
                Snapshot::with_schema(Arc::clone(&self.schema), Some(conditions.join(" and ")));
            for row_id in row_ids {
                child.add_row(self.rows[row_id].clone())?;
            }
            let labels = group
                .into_iter()
                .map(|v| v.unwrap_or_else(|| "null".to_string()))
                .collect();
            result.push((labels, child));
        }
        Ok(result)
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// Serialize to the snapshot file form: pretty-printed JSON with the
    /// schema, the filter and one column-name→value map per record, keys in
    /// column ordinal order and values type-correct (see
    /// [`TypeTag::json_value`](crate::TypeTag::json_value)). Writing the
    /// same snapshot twice yields byte-identical output.
    pub fn to_json(&self) -> Result<String> {
        let file = SnapshotFile {
            table: &self.schema,
            filter: self.filter.as_deref(),
            records: self
                .rows
                .iter()
                .map(|r| RecordOut {
                    schema: &self.schema,
                    values: r,
                })
                .collect(),
        };
        let mut text = serde_json::to_string_pretty(&file)?;
        text.push('\n');
        Ok(text)
    }

    /// Reconstruct a snapshot from its file form. Record values are matched
    /// to columns by name, so the JSON key order does not matter; missing
    /// columns load as SQL NULL.
    pub fn from_json(text: &str) -> Result<Snapshot> {
        let raw: RawSnapshot = serde_json::from_str(text).context("malformed snapshot file")?;
        let mut snapshot = Snapshot::new(raw.table, raw.filter);
        for record in &raw.records {
            let mut row = Vec::with_capacity(snapshot.schema.column_count());
            for column in snapshot.schema.columns() {
                let value = match record.get(&column.name) {
                    Some(v) => column
                        .tag
                        .canonical_from_json(v)
                        .with_context(|| format!("column {}", column.name))?,
                    None => None,
                };
                row.push(value);
            }
            snapshot.add_row(row)?;
        }
        Ok(snapshot)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File form
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SnapshotFile<'a> {
    table: &'a TableSchema,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    records: Vec<RecordOut<'a>>,
}

struct RecordOut<'a> {
    schema: &'a TableSchema,
    values: &'a [Option<String>],
}

impl Serialize for RecordOut<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.schema.column_count()))?;
        for (column, value) in self.schema.columns().iter().zip(self.values) {
            map.serialize_entry(&column.name, &column.tag.json_value(value.as_deref()))?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawSnapshot {
    table: TableSchema,
    #[serde(rename = "where", default)]
    filter: Option<String>,
    #[serde(default)]
    records: Vec<serde_json::Map<String, Value>>,
}

fn rows_equal(a: &[Option<String>], b: &[Option<String>], mask: Option<&[bool]>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b)
        .enumerate()
        .all(|(i, (x, y))| !mask.map_or(true, |m| m[i]) || x == y)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{Column, PrimaryKey};
    use crate::domain::sql_type::TypeTag;

    fn col(position: u32, name: &str, tag: TypeTag, size: u32) -> Column {
        Column {
            position,
            name: name.to_string(),
            tag,
            size,
            scale: 0,
            nullable: true,
            auto_increment: false,
            remarks: None,
        }
    }

    fn schema() -> TableSchema {
        TableSchema::new(
            "tab",
            vec![
                col(1, "pk_char", TypeTag::Varchar, 3),
                col(2, "col_char", TypeTag::Varchar, 30),
                col(3, "col_date", TypeTag::Date, 0),
                col(4, "pk_int", TypeTag::Integer, 0),
            ],
            PrimaryKey {
                name: None,
                columns: vec!["pk_char".to_string(), "pk_int".to_string()],
            },
            vec![],
        )
        .unwrap()
    }

    fn row(pk_char: &str, col_char: &str, pk_int: i64) -> Vec<Option<String>> {
        vec![
            Some(pk_char.to_string()),
            Some(col_char.to_string()),
            Some("2024-03-01".to_string()),
            Some(pk_int.to_string()),
        ]
    }

    fn snapshot(rows: &[Vec<Option<String>>]) -> Snapshot {
        let mut snap = Snapshot::new(schema(), None);
        for r in rows {
            snap.add_row(r.clone()).unwrap();
        }
        snap
    }

    #[test]
    fn add_row_rejects_wrong_column_count() {
        let mut snap = Snapshot::new(schema(), None);
        let err = snap.add_row(vec![Some("x".to_string())]).unwrap_err();
        assert!(err.to_string().contains("4 columns"));
    }

    #[test]
    fn record_lookup_by_key() {
        let snap = snapshot(&[row("111", "test123", 1), row("222", "test123", 1)]);
        let key = snap.keys().next().unwrap();
        assert!(snap.contains_key(&key));
        let rec = snap.record(&key).unwrap();
        assert_eq!(rec.value("col_char"), Some("test123"));
        assert_eq!(rec.key(), key);
    }

    #[test]
    fn keys_follow_insertion_order() {
        let snap = snapshot(&[row("111", "a", 2), row("111", "b", 1)]);
        let keys: Vec<String> = snap.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["[111, 2]", "[111, 1]"]);
    }

    #[test]
    fn null_and_empty_string_are_distinct() {
        let mut snap = Snapshot::new(schema(), None);
        snap.add_row(vec![
            Some("1".to_string()),
            None,
            None,
            Some("1".to_string()),
        ])
        .unwrap();
        snap.add_row(vec![
            Some("1".to_string()),
            Some(String::new()),
            None,
            Some("2".to_string()),
        ])
        .unwrap();
        let keys: Vec<Key> = snap.keys().collect();
        let a = snap.record(&keys[0]).unwrap();
        let b = snap.record(&keys[1]).unwrap();
        assert_eq!(a.value("col_char"), None);
        assert_eq!(b.value("col_char"), Some(""));
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    #[test]
    fn json_round_trip_preserves_everything() {
        let mut snap = Snapshot::new(schema(), Some("pk_char = '111'".to_string()));
        snap.add_row(row("111", "test123", 1)).unwrap();
        snap.add_row(vec![
            Some("111".to_string()),
            None,
            None,
            Some("2".to_string()),
        ])
        .unwrap();

        let text = snap.to_json().unwrap();
        let back = Snapshot::from_json(&text).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.filter(), Some("pk_char = '111'"));
    }

    #[test]
    fn serialization_is_byte_identical_across_writes() {
        let snap = snapshot(&[row("111", "test123", 1), row("222", "x", 3)]);
        assert_eq!(snap.to_json().unwrap(), snap.to_json().unwrap());
        let reloaded = Snapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.to_json().unwrap(), snap.to_json().unwrap());
    }

    #[test]
    fn integers_are_emitted_as_json_numbers() {
        let snap = snapshot(&[row("111", "test123", 7)]);
        let text = snap.to_json().unwrap();
        assert!(text.contains("\"pk_int\": 7"), "{text}");
        assert!(!text.contains("\"pk_int\": \"7\""), "{text}");
    }

    #[test]
    fn empty_snapshot_round_trips() {
        let snap = Snapshot::new(schema(), None);
        let back = Snapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert!(back.is_empty());
        assert_eq!(back, snap);
    }

    #[test]
    fn from_json_tolerates_reordered_record_keys() {
        let snap = snapshot(&[row("111", "test123", 1)]);
        let text = snap.to_json().unwrap();
        // Rebuild the record objects with their keys alphabetized.
        let mut value: Value = serde_json::from_str(&text).unwrap();
        let records = value["records"].as_array().unwrap().clone();
        let reordered: Vec<Value> = records
            .iter()
            .map(|r| {
                let sorted: BTreeMap<String, Value> = serde_json::from_value(r.clone()).unwrap();
                serde_json::to_value(sorted).unwrap()
            })
            .collect();
        value["records"] = Value::Array(reordered);
        let back = Snapshot::from_json(&value.to_string()).unwrap();
        assert_eq!(back, snap);
    }

    // ── split_by ────────────────────────────────────────────────────────────

    #[test]
    fn split_by_partitions_rows_and_extends_filter() {
        let snap = snapshot(&[row("111", "a", 1), row("222", "b", 1), row("111", "c", 2)]);
        let groups = snap.split_by(&["pk_char".to_string()]).unwrap();
        assert_eq!(groups.len(), 2);

        let (labels, first) = &groups[0];
        assert_eq!(labels, &vec!["111".to_string()]);
        assert_eq!(first.len(), 2);
        assert_eq!(first.filter(), Some("pk_char = '111'"));

        let (labels, second) = &groups[1];
        assert_eq!(labels, &vec!["222".to_string()]);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn split_by_unknown_column_fails() {
        let snap = snapshot(&[row("111", "a", 1)]);
        let err = snap.split_by(&["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}

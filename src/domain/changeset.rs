use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::domain::ports::DataSource;
use crate::domain::schema::Column;
use crate::domain::snapshot::{Key, RecordRef, Snapshot};

// ─────────────────────────────────────────────────────────────────────────────
// ChangeSet
// ─────────────────────────────────────────────────────────────────────────────

/// The computed difference between two snapshots of the same table: the
/// reference (desired state) and the target (current state), plus the three
/// disjoint key sets that reconcile them.
///
/// A change set is a value object — computed once by
/// [`Snapshot::delta`], rendered or applied, then discarded. It does not
/// track whether it has been applied; re-applying the same change set
/// without re-diffing re-attempts already-completed operations.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    reference: Snapshot,
    target: Snapshot,
    insert_keys: Vec<Key>,
    update_keys: Vec<Key>,
    delete_keys: Vec<Key>,
}

/// Row counts of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub total: usize,
}

impl ChangeSet {
    pub(crate) fn new(
        reference: Snapshot,
        target: Snapshot,
        insert_keys: Vec<Key>,
        update_keys: Vec<Key>,
        delete_keys: Vec<Key>,
    ) -> Self {
        ChangeSet {
            reference,
            target,
            insert_keys,
            update_keys,
            delete_keys,
        }
    }

    pub fn reference(&self) -> &Snapshot {
        &self.reference
    }

    pub fn target(&self) -> &Snapshot {
        &self.target
    }

    pub fn table_name(&self) -> &str {
        self.target.table_name()
    }

    pub fn insert_keys(&self) -> &[Key] {
        &self.insert_keys
    }

    pub fn update_keys(&self) -> &[Key] {
        &self.update_keys
    }

    pub fn delete_keys(&self) -> &[Key] {
        &self.delete_keys
    }

    pub fn is_empty(&self) -> bool {
        self.insert_keys.is_empty() && self.update_keys.is_empty() && self.delete_keys.is_empty()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            inserts: self.insert_keys.len(),
            updates: self.update_keys.len(),
            deletes: self.delete_keys.len(),
            total: self.insert_keys.len() + self.update_keys.len() + self.delete_keys.len(),
        }
    }

    /// Rows to add to the target, sourced from the reference.
    pub fn insert_records(&self) -> Vec<RecordRef<'_>> {
        records_of(&self.reference, &self.insert_keys)
    }

    /// Rows to rewrite in the target, with the reference's values.
    pub fn update_records(&self) -> Vec<RecordRef<'_>> {
        records_of(&self.reference, &self.update_keys)
    }

    /// Rows to remove, as they exist in the target.
    pub fn delete_records(&self) -> Vec<RecordRef<'_>> {
        records_of(&self.target, &self.delete_keys)
    }

    // ── Prepared-statement apply ────────────────────────────────────────────

    /// Apply the whole change set: inserts, then updates, then deletes —
    /// the order least likely to trip referential assumptions around rows
    /// inserted in the same batch.
    ///
    /// One statement is issued per affected row. A failing statement aborts
    /// the apply unless `continue_on_error` is set, in which case it is
    /// reported and the loop moves on. Partial application is possible
    /// either way — wrap the session in a transaction and commit or roll
    /// back after this returns.
    pub async fn apply(&self, db: &dyn DataSource, continue_on_error: bool) -> Result<()> {
        if !self.insert_keys.is_empty() {
            info!(table = self.table_name(), rows = self.insert_keys.len(), "inserting rows");
        }
        self.apply_inserts(db, continue_on_error).await?;
        if !self.update_keys.is_empty() {
            info!(table = self.table_name(), rows = self.update_keys.len(), "updating rows");
        }
        self.apply_updates(db, continue_on_error).await?;
        if !self.delete_keys.is_empty() {
            info!(table = self.table_name(), rows = self.delete_keys.len(), "deleting rows");
        }
        self.apply_deletes(db, continue_on_error).await?;
        Ok(())
    }

    pub async fn apply_inserts(&self, db: &dyn DataSource, continue_on_error: bool) -> Result<()> {
        let schema = self.reference.schema();
        let columns: Vec<&Column> = schema.columns().iter().collect();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let markers: Vec<String> = (1..=columns.len()).map(|i| db.bind_marker(i)).collect();
        let sql = format!(
            "insert into {} ({}) values ({})",
            schema.name(),
            names.join(", "),
            markers.join(", ")
        );

        for record in self.insert_records() {
            run_statement(db, &sql, &columns, &record, continue_on_error).await?;
        }
        Ok(())
    }

    pub async fn apply_updates(&self, db: &dyn DataSource, continue_on_error: bool) -> Result<()> {
        let schema = self.reference.schema();
        let non_pk: Vec<&Column> = schema.non_pk_columns().collect();
        if non_pk.is_empty() {
            // Every column is part of the key — equal keys mean equal rows.
            return Ok(());
        }
        let pk: Vec<&Column> = schema.pk_columns().collect();

        let set: Vec<String> = non_pk
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c.name, db.bind_marker(i + 1)))
            .collect();
        let conditions: Vec<String> = pk
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c.name, db.bind_marker(non_pk.len() + i + 1)))
            .collect();
        let sql = format!(
            "update {} set {} where {}",
            schema.name(),
            set.join(", "),
            conditions.join(" and ")
        );

        let order: Vec<&Column> = non_pk.into_iter().chain(pk).collect();
        for record in self.update_records() {
            run_statement(db, &sql, &order, &record, continue_on_error).await?;
        }
        Ok(())
    }

    pub async fn apply_deletes(&self, db: &dyn DataSource, continue_on_error: bool) -> Result<()> {
        let schema = self.target.schema();
        let pk: Vec<&Column> = schema.pk_columns().collect();
        let conditions: Vec<String> = pk
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c.name, db.bind_marker(i + 1)))
            .collect();
        let sql = format!(
            "delete from {} where {}",
            schema.name(),
            conditions.join(" and ")
        );

        for record in self.delete_records() {
            run_statement(db, &sql, &pk, &record, continue_on_error).await?;
        }
        Ok(())
    }

    // ── Script generation ───────────────────────────────────────────────────

    /// The forward script: deletes against the target's identity, then
    /// inserts and updates sourced from the reference. Values are rendered
    /// as literals so the script replays offline through any SQL client.
    pub fn sql_apply_stmts(&self) -> Vec<String> {
        let mut stmts = delete_stmts(&self.target, &self.delete_keys);
        stmts.extend(insert_stmts(&self.reference, &self.insert_keys));
        stmts.extend(update_stmts(&self.reference, &self.update_keys));
        stmts
    }

    /// The exact inverse of the forward script: delete the rows it
    /// inserted, re-insert the rows it deleted (with the target's original
    /// values), and rewrite the rows it updated back to the target's
    /// original values. Running the forward script and then this one
    /// returns an unconcurrently-modified table to its starting state.
    pub fn sql_undo_stmts(&self) -> Vec<String> {
        let mut stmts = delete_stmts(&self.reference, &self.insert_keys);
        stmts.extend(insert_stmts(&self.target, &self.delete_keys));
        stmts.extend(update_stmts(&self.target, &self.update_keys));
        stmts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statement helpers
// ─────────────────────────────────────────────────────────────────────────────

fn records_of<'a>(snapshot: &'a Snapshot, keys: &[Key]) -> Vec<RecordRef<'a>> {
    keys.iter().filter_map(|k| snapshot.record(k)).collect()
}

async fn run_statement(
    db: &dyn DataSource,
    sql: &str,
    columns: &[&Column],
    record: &RecordRef<'_>,
    continue_on_error: bool,
) -> Result<()> {
    let outcome = match columns
        .iter()
        .map(|c| c.tag.bind_value(record.value(&c.name)))
        .collect::<Result<Vec<_>>>()
    {
        Ok(params) => {
            debug!(sql, "executing");
            db.execute_bound(sql, &params).await.map(|_| ())
        }
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        error!(statement = sql, "statement failed: {e:#}");
        if !continue_on_error {
            return Err(e.context(format!("failed statement: {sql}")));
        }
    }
    Ok(())
}

fn pk_condition(record: &RecordRef<'_>) -> String {
    record
        .schema()
        .pk_columns()
        .map(|c| match record.value(&c.name) {
            Some(_) => format!("{} = {}", c.name, c.tag.literal(record.value(&c.name))),
            None => format!("{} is null", c.name),
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

fn delete_stmts(snapshot: &Snapshot, keys: &[Key]) -> Vec<String> {
    records_of(snapshot, keys)
        .iter()
        .map(|record| {
            format!(
                "delete from {} where {};",
                record.schema().name(),
                pk_condition(record)
            )
        })
        .collect()
}

fn insert_stmts(snapshot: &Snapshot, keys: &[Key]) -> Vec<String> {
    let schema = snapshot.schema();
    let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
    records_of(snapshot, keys)
        .iter()
        .map(|record| {
            let values: Vec<String> = schema
                .columns()
                .iter()
                .map(|c| c.tag.literal(record.value(&c.name)))
                .collect();
            format!(
                "insert into {} ({}) values ({});",
                schema.name(),
                names.join(", "),
                values.join(", ")
            )
        })
        .collect()
}

fn update_stmts(snapshot: &Snapshot, keys: &[Key]) -> Vec<String> {
    let schema = snapshot.schema();
    records_of(snapshot, keys)
        .iter()
        .map(|record| {
            let set: Vec<String> = schema
                .non_pk_columns()
                .map(|c| format!("{} = {}", c.name, c.tag.literal(record.value(&c.name))))
                .collect();
            format!(
                "update {} set {} where {};",
                schema.name(),
                set.join(", "),
                pk_condition(record)
            )
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::domain::schema::{Column, PrimaryKey, TableSchema};
    use crate::domain::sql_type::{BindValue, TypeTag};

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

    fn snapshot(rows: Vec<Vec<Option<String>>>) -> Snapshot {
        let mut snap = Snapshot::new(schema(), None);
        for r in rows {
            snap.add_row(r).unwrap();
        }
        snap
    }

    /// Reference rows and the live state after one delete, one update and
    /// one insert happened on the live side.
    fn reference() -> Snapshot {
        snapshot(vec![
            row("111", "test123", 1),
            row("111", "test123", 2),
            row("111", "test123", 3),
            row("222", "test123", 1),
        ])
    }

    fn live() -> Snapshot {
        snapshot(vec![
            row("111", "changed data", 2),
            row("111", "test123", 3),
            row("222", "test123", 1),
            row("111", "test456", 4),
        ])
    }

    // ── Delta key sets ──────────────────────────────────────────────────────

    #[test]
    fn delta_detects_one_insert_one_update_one_delete() {
        let changes = reference().delta(live(), &[]).unwrap();
        let summary = changes.summary();
        assert_eq!(summary.inserts, 1);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.deletes, 1);
        assert_eq!(summary.total, 3);

        assert_eq!(changes.insert_keys()[0].to_string(), "[111, 1]");
        assert_eq!(changes.update_keys()[0].to_string(), "[111, 2]");
        assert_eq!(changes.delete_keys()[0].to_string(), "[111, 4]");
        assert!(!changes.is_empty());
    }

    #[test]
    fn delta_of_identical_snapshots_is_empty() {
        let changes = reference().delta(reference(), &[]).unwrap();
        assert!(changes.is_empty());
        assert!(changes.sql_apply_stmts().is_empty());
        assert!(changes.sql_undo_stmts().is_empty());
    }

    #[test]
    fn delta_is_symmetric() {
        let forward = reference().delta(live(), &[]).unwrap();
        let backward = live().delta(reference(), &[]).unwrap();
        assert_eq!(forward.insert_keys(), backward.delete_keys());
        assert_eq!(forward.delete_keys(), backward.insert_keys());
        assert_eq!(forward.update_keys(), backward.update_keys());
    }

    #[test]
    fn ignored_column_suppresses_update_detection() {
        let ignore = vec!["col_char".to_string()];
        let changes = reference().delta(live(), &ignore).unwrap();
        // The only difference on [111, 2] is col_char, so no update remains;
        // insert/delete detection is key-based and unaffected.
        assert_eq!(changes.update_keys().len(), 0);
        assert_eq!(changes.insert_keys().len(), 1);
        assert_eq!(changes.delete_keys().len(), 1);
    }

    #[test]
    fn updates_on_other_columns_survive_the_ignore_list() {
        let mut modified = reference();
        // change col_date on [222, 1]
        let mut snap = Snapshot::new(schema(), None);
        for record in modified.records() {
            let mut values = record.values().to_vec();
            if record.value("pk_char") == Some("222") {
                values[2] = Some("2025-01-01".to_string());
            }
            snap.add_row(values).unwrap();
        }
        modified = snap;

        let ignore = vec!["col_char".to_string()];
        let changes = reference().delta(modified, &ignore).unwrap();
        assert_eq!(changes.update_keys().len(), 1);
        assert_eq!(changes.update_keys()[0].to_string(), "[222, 1]");
    }

    #[test]
    fn ignoring_a_primary_key_column_is_an_error() {
        let ignore = vec!["pk_int".to_string()];
        let err = reference().delta(live(), &ignore).unwrap_err();
        assert!(err.to_string().contains("can not be ignored"));
    }

    #[test]
    fn differing_table_names_are_rejected() {
        let other = TableSchema::new(
            "other",
            vec![col(1, "id", TypeTag::Integer, 0)],
            PrimaryKey {
                name: None,
                columns: vec!["id".to_string()],
            },
            vec![],
        )
        .unwrap();
        let err = reference().delta(Snapshot::new(other, None), &[]).unwrap_err();
        assert!(err.to_string().contains("different tables"));
    }

    #[test]
    fn table_name_comparison_is_case_insensitive() {
        let upper = TableSchema::new(
            "TAB",
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
        .unwrap();
        let mut target = Snapshot::new(upper, None);
        target.add_row(row("111", "test123", 1)).unwrap();
        assert!(reference().delta(target, &[]).is_ok());
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let keyless = TableSchema::new(
            "tab",
            vec![col(1, "pk_char", TypeTag::Varchar, 3)],
            PrimaryKey {
                name: None,
                columns: vec![],
            },
            vec![],
        )
        .unwrap();
        let err = Snapshot::new(keyless.clone(), None)
            .delta(Snapshot::new(keyless, None), &[])
            .unwrap_err();
        assert!(err.to_string().contains("no primary key"));
    }

    #[test]
    fn column_mismatch_warns_but_proceeds() {
        let drifted = TableSchema::new(
            "tab",
            vec![
                col(1, "pk_char", TypeTag::Varchar, 3),
                col(2, "col_renamed", TypeTag::Varchar, 30),
                col(3, "col_date", TypeTag::Date, 0),
                col(4, "pk_int", TypeTag::Integer, 0),
            ],
            PrimaryKey {
                name: None,
                columns: vec!["pk_char".to_string(), "pk_int".to_string()],
            },
            vec![],
        )
        .unwrap();
        let mut target = Snapshot::new(drifted, None);
        target.add_row(row("111", "test123", 1)).unwrap();

        // Values still compare positionally; identical rows yield no update.
        let changes = reference().delta(target, &[]).unwrap();
        assert_eq!(changes.update_keys().len(), 0);
        assert_eq!(changes.insert_keys().len(), 3);
    }

    // ── Script generation ───────────────────────────────────────────────────

    #[test]
    fn forward_script_orders_delete_insert_update() {
        let changes = reference().delta(live(), &[]).unwrap();
        let stmts = changes.sql_apply_stmts();
        assert_eq!(stmts.len(), 3);
        assert_eq!(
            stmts[0],
            "delete from tab where pk_char = '111' and pk_int = 4;"
        );
        assert_eq!(
            stmts[1],
            "insert into tab (pk_char, col_char, col_date, pk_int) \
             values ('111', 'test123', DATE'2024-03-01', 1);"
        );
        assert_eq!(
            stmts[2],
            "update tab set col_char = 'test123', col_date = DATE'2024-03-01' \
             where pk_char = '111' and pk_int = 2;"
        );
    }

    #[test]
    fn undo_script_reverts_with_target_values() {
        let changes = reference().delta(live(), &[]).unwrap();
        let stmts = changes.sql_undo_stmts();
        assert_eq!(stmts.len(), 3);
        // drop the row the forward script inserted
        assert_eq!(
            stmts[0],
            "delete from tab where pk_char = '111' and pk_int = 1;"
        );
        // resurrect the row it deleted, with the target's values
        assert_eq!(
            stmts[1],
            "insert into tab (pk_char, col_char, col_date, pk_int) \
             values ('111', 'test456', DATE'2024-03-01', 4);"
        );
        // rewrite the updated row back to the target's original values
        assert_eq!(
            stmts[2],
            "update tab set col_char = 'changed data', col_date = DATE'2024-03-01' \
             where pk_char = '111' and pk_int = 2;"
        );
    }

    #[test]
    fn undo_script_equals_reverse_forward_script() {
        let forward = reference().delta(live(), &[]).unwrap();
        let backward = live().delta(reference(), &[]).unwrap();
        let mut undo = forward.sql_undo_stmts();
        let mut reverse = backward.sql_apply_stmts();
        undo.sort();
        reverse.sort();
        assert_eq!(undo, reverse);
    }

    #[test]
    fn null_key_values_render_is_null_conditions() {
        let mut target = snapshot(vec![]);
        target
            .add_row(vec![
                Some("111".to_string()),
                Some("x".to_string()),
                None,
                None,
            ])
            .unwrap();
        let changes = snapshot(vec![]).delta(target, &[]).unwrap();
        let stmts = changes.sql_apply_stmts();
        assert_eq!(
            stmts[0],
            "delete from tab where pk_char = '111' and pk_int is null;"
        );
    }

    // ── Prepared-statement apply ────────────────────────────────────────────

    /// Records every statement; optionally fails those containing a marker.
    struct FakeDb {
        statements: Mutex<Vec<(String, Vec<BindValue>)>>,
        fail_on: Option<&'static str>,
    }

    impl FakeDb {
        fn new(fail_on: Option<&'static str>) -> Self {
            FakeDb {
                statements: Mutex::new(Vec::new()),
                fail_on,
            }
        }

        fn executed(&self) -> Vec<String> {
            self.statements
                .lock()
                .unwrap()
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect()
        }
    }

    #[async_trait]
    impl DataSource for FakeDb {
        async fn fetch(&self, _: &str, _: Option<&str>) -> Result<Snapshot> {
            unimplemented!()
        }
        async fn table_schema(&self, _: &str) -> Result<TableSchema> {
            unimplemented!()
        }
        async fn table_names(&self, _: Option<&str>) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn table_exists(&self, _: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn create_table(&self, _: &TableSchema) -> Result<()> {
            unimplemented!()
        }
        async fn execute(&self, _: &str) -> Result<u64> {
            unimplemented!()
        }
        async fn execute_bound(&self, sql: &str, params: &[BindValue]) -> Result<u64> {
            let fails = self
                .fail_on
                .is_some_and(|marker| params.iter().any(|p| *p == BindValue::Text(marker.into())));
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            if fails {
                bail!("constraint violation");
            }
            Ok(1)
        }
        async fn commit(&self) -> Result<()> {
            Ok(())
        }
        async fn rollback(&self) -> Result<()> {
            Ok(())
        }
        fn bind_marker(&self, _: usize) -> String {
            "?".to_string()
        }
    }

    #[tokio::test]
    async fn apply_runs_insert_update_delete_in_order() {
        let changes = reference().delta(live(), &[]).unwrap();
        let db = FakeDb::new(None);
        changes.apply(&db, false).await.unwrap();

        let executed = db.executed();
        assert_eq!(executed.len(), 3);
        assert_eq!(
            executed[0],
            "insert into tab (pk_char, col_char, col_date, pk_int) values (?, ?, ?, ?)"
        );
        assert_eq!(
            executed[1],
            "update tab set col_char = ?, col_date = ? where pk_char = ? and pk_int = ?"
        );
        assert_eq!(executed[2], "delete from tab where pk_char = ? and pk_int = ?");
    }

    #[tokio::test]
    async fn apply_binds_typed_parameters() {
        let changes = reference().delta(live(), &[]).unwrap();
        let db = FakeDb::new(None);
        changes.apply_inserts(&db, false).await.unwrap();

        let recorded = db.statements.lock().unwrap();
        let (_, params) = &recorded[0];
        assert_eq!(params[0], BindValue::Text("111".to_string()));
        assert_eq!(params[2], BindValue::Text("2024-03-01".to_string()));
        assert_eq!(params[3], BindValue::Int(1));
    }

    #[tokio::test]
    async fn failing_statement_aborts_without_continue_on_error() {
        // the inserted reference row carries "test123" in col_char
        let changes = reference().delta(live(), &[]).unwrap();
        let db = FakeDb::new(Some("test123"));
        let err = changes.apply(&db, false).await.unwrap_err();
        assert!(format!("{err:#}").contains("insert into tab"));
        // nothing after the failing insert ran
        assert_eq!(db.executed().len(), 1);
    }

    #[tokio::test]
    async fn failing_statement_is_skipped_with_continue_on_error() {
        let changes = reference().delta(live(), &[]).unwrap();
        let db = FakeDb::new(Some("test123"));
        changes.apply(&db, true).await.unwrap();
        // insert failed but update and delete still ran
        assert_eq!(db.executed().len(), 3);
    }
}

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::domain::changeset::ChangeSet;
use crate::domain::ports::DataSource;
use crate::domain::schema::TableSchema;
use crate::domain::snapshot::Snapshot;

// ─────────────────────────────────────────────────────────────────────────────
// DiffService
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates a diff between a reference snapshot and the live database,
/// and the transactional application of the resulting change set.
///
/// The service never commits on its own initiative: `apply` commits only
/// when asked to, and rolling back after an aborted apply stays the
/// caller's decision.
pub struct DiffService {
    db: Arc<dyn DataSource>,
}

impl DiffService {
    pub fn new(db: Arc<dyn DataSource>) -> Self {
        Self { db }
    }

    /// Re-fetch the live state of the reference snapshot's table (scoped by
    /// the snapshot's own filter) and compute the change set that brings
    /// the live table in line with the reference.
    pub async fn delta_to_live(
        &self,
        reference: Snapshot,
        ignore_columns: &[String],
    ) -> Result<ChangeSet> {
        let live = self
            .db
            .fetch(reference.table_name(), reference.filter())
            .await?;
        reference.delta(live, ignore_columns)
    }

    /// Check that the snapshot's table exists; create it from the snapshot
    /// schema when `create_missing` is set. Returns whether the table
    /// exists afterwards.
    pub async fn ensure_table(&self, schema: &TableSchema, create_missing: bool) -> Result<bool> {
        if self.db.table_exists(schema.name()).await? {
            return Ok(true);
        }
        if !create_missing {
            return Ok(false);
        }
        info!(table = schema.name(), "table does not exist, creating it");
        self.db.create_table(schema).await?;
        Ok(true)
    }

    /// Apply the change set (inserts, updates, deletes in that order),
    /// commit when `commit` is set, and return the undo script that
    /// reverses what was just applied.
    pub async fn apply(
        &self,
        changes: &ChangeSet,
        commit: bool,
        continue_on_error: bool,
    ) -> Result<Vec<String>> {
        changes.apply(self.db.as_ref(), continue_on_error).await?;
        if commit {
            self.db.commit().await?;
        }
        Ok(changes.sql_undo_stmts())
    }
}

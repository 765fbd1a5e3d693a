use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::domain::ports::DataSource;
use crate::domain::snapshot::Snapshot;

// ─────────────────────────────────────────────────────────────────────────────
// ExportService
// ─────────────────────────────────────────────────────────────────────────────

/// Captures point-in-time snapshots of live tables for export.
///
/// `DiffService` reconciles; this service only reads. Writing the captured
/// snapshots to disk is left to the presentation layer so the capture path
/// stays reusable from library code.
pub struct ExportService {
    db: Arc<dyn DataSource>,
}

impl ExportService {
    pub fn new(db: Arc<dyn DataSource>) -> Self {
        Self { db }
    }

    /// Capture one table, optionally scoped by a `where` clause.
    pub async fn capture(&self, table: &str, filter: Option<&str>) -> Result<Snapshot> {
        let snapshot = self.db.fetch(table, filter).await?;
        info!(table, rows = snapshot.len(), "captured snapshot");
        Ok(snapshot)
    }

    /// Capture every table matching a SQL `LIKE` pattern. A table that
    /// fails to capture is reported and skipped — one broken table must not
    /// sink a batch export.
    pub async fn capture_matching(
        &self,
        pattern: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Vec<Snapshot>> {
        let tables = self.db.table_names(pattern).await?;
        let mut snapshots = Vec::with_capacity(tables.len());
        for table in &tables {
            match self.capture(table, filter).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => error!(table, "skipping table, capture failed: {e:#}"),
            }
        }
        Ok(snapshots)
    }
}

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// ─── Log level ────────────────────────────────────────────────────────────────

/// Controls the verbosity of rowsync's internal tracing output.
///
/// Pass to [`init_tracing`] before calling any async entry point.
///
/// | Variant | `tracing` level | When to use                          |
/// |---------|-----------------|--------------------------------------|
/// | `Error` | `error`         | `--quiet` / CI scripting             |
/// | `Info`  | `info`          | Default — row counts and progress    |
/// | `Debug` | `debug`         | `--verbose` — shows SQL statements   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
}

/// Initialise the global `tracing` subscriber for rowsync.
///
/// This is a convenience wrapper around `tracing_subscriber`. It respects
/// `RUST_LOG` when set, falling back to `level` otherwise.
///
/// Call this **once** at application startup. Library consumers who manage
/// their own subscriber should skip this and configure tracing themselves.
///
/// Only available when the `cli` feature is enabled (pulls in
/// `tracing-subscriber`).
#[cfg(feature = "cli")]
pub fn init_tracing(level: LogLevel) {
    let default_filter = match level {
        LogLevel::Error => "rowsync=error",
        LogLevel::Info => "rowsync=info",
        LogLevel::Debug => "rowsync=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

// ─── Public API Facade ───

pub use application::diff::DiffService;
pub use application::export::ExportService;
pub use domain::changeset::{ChangeSet, Summary};
pub use domain::ports::DataSource;
pub use domain::schema::{Column, ForeignKey, PrimaryKey, TableSchema};
pub use domain::snapshot::{Key, RecordRef, Snapshot};
pub use domain::sql_type::{BindValue, TypeTag};
pub use infrastructure::config::{AppConfig, DbConfig, DiffConfig};
pub use infrastructure::db::client::{connect, SqlxDataSource};

// ─── Public entry points ───

/// Diff a stored snapshot file against the live table it was captured
/// from.
///
/// Reads the file, re-fetches the live rows (scoped by the snapshot's own
/// filter) and returns the change set that would bring the live table back
/// in line with the snapshot. Rendering, applying and committing are left
/// to the caller — see [`DiffService`] for the full workflow.
pub async fn diff_snapshot_file(cfg: &AppConfig, path: &Path) -> Result<ChangeSet> {
    let reference = presentation::writers::read_snapshot(path)?;
    let db = Arc::new(connect(&cfg.connection).await?);
    DiffService::new(db)
        .delta_to_live(reference, &cfg.diff.ignore_columns)
        .await
}

/// Capture a live table into a [`Snapshot`], ready to be persisted with
/// [`presentation::writers::write_snapshot`].
pub async fn capture_table(
    cfg: &AppConfig,
    table: &str,
    filter: Option<&str>,
) -> Result<Snapshot> {
    let db = Arc::new(connect(&cfg.connection).await?);
    ExportService::new(db).capture(table, filter).await
}

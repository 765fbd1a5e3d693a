use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::domain::snapshot::Snapshot;

/// File name for an exported table snapshot: `<table>.snapshot`, lowered,
/// optionally stamped with the capture time.
pub fn snapshot_path(dir: &Path, table: &str, timestamped: bool) -> PathBuf {
    let name = if timestamped {
        format!(
            "{}_{}.snapshot",
            table.to_lowercase(),
            Local::now().format("%Y%m%d_%H%M")
        )
    } else {
        format!("{}.snapshot", table.to_lowercase())
    };
    dir.join(name)
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let content = snapshot.to_json()?;
    fs::write(path, content)
        .with_context(|| format!("failed to write snapshot file {}", path.display()))
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot file {}", path.display()))?;
    Snapshot::from_json(&content)
        .with_context(|| format!("invalid snapshot file {}", path.display()))
}

/// Write a generated SQL script, one terminated statement per line, ready
/// for replay by any SQL client.
pub fn write_script(path: &Path, statements: &[String]) -> Result<()> {
    let mut content = statements.join("\n");
    content.push('\n');
    fs::write(path, content)
        .with_context(|| format!("failed to write script file {}", path.display()))
}

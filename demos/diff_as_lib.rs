//! # rowsync — library usage example
//!
//! Shows the core workflow without a database: build two snapshots in
//! memory, diff them, render the result and print the forward and undo
//! scripts. The same [`ChangeSet`] API drives the live-database path —
//! swap the hand-built target for `SqlxDataSource::fetch`.
//!
//! Run with:
//!   cargo run --example diff_as_lib --features cli

use anyhow::Result;
use rowsync::presentation::console::render_diff;
use rowsync::{Column, PrimaryKey, Snapshot, TableSchema, TypeTag};

fn column(position: u32, name: &str, tag: TypeTag, size: u32) -> Column {
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

fn pricing_schema() -> Result<TableSchema> {
    TableSchema::new(
        "pricing_rules",
        vec![
            column(1, "id", TypeTag::Integer, 0),
            column(2, "name", TypeTag::Varchar, 40),
            column(3, "rate", TypeTag::Numeric, 6),
            column(4, "valid_from", TypeTag::Date, 0),
        ],
        PrimaryKey {
            name: None,
            columns: vec!["id".to_string()],
        },
        vec![],
    )
}

fn row(id: i64, name: &str, rate: &str, valid_from: &str) -> Vec<Option<String>> {
    vec![
        Some(id.to_string()),
        Some(name.to_string()),
        Some(rate.to_string()),
        Some(valid_from.to_string()),
    ]
}

fn main() -> Result<()> {
    // The state we want (e.g. loaded from a .snapshot file in real use).
    let mut reference = Snapshot::new(pricing_schema()?, None);
    reference.add_row(row(1, "standard", "0.10", "2024-01-01"))?;
    reference.add_row(row(2, "reduced", "0.25", "2024-01-01"))?;
    reference.add_row(row(4, "promo", "0.05", "2024-06-01"))?;

    // The state the table is currently in.
    let mut live = Snapshot::new(pricing_schema()?, None);
    live.add_row(row(1, "standard", "0.10", "2024-01-01"))?;
    live.add_row(row(2, "reduced", "0.20", "2024-01-01"))?;
    live.add_row(row(3, "legacy", "0.15", "2023-01-01"))?;

    let changes = reference.delta(live, &[])?;
    println!("{}\n", render_diff(&changes, true));

    println!("-- Forward script:");
    for stmt in changes.sql_apply_stmts() {
        println!("{stmt}");
    }

    println!("\n-- Undo script:");
    for stmt in changes.sql_undo_stmts() {
        println!("{stmt}");
    }

    Ok(())
}

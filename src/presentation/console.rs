use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};

use crate::domain::changeset::ChangeSet;
use crate::domain::schema::Column as SchemaColumn;
use crate::domain::snapshot::RecordRef;

// ─────────────────────────────────────────────────────────────────────────────
// Diff rendering
// ─────────────────────────────────────────────────────────────────────────────

/// Print the diff to stdout: the counts line always, full before/after
/// tables in verbose mode.
pub fn print_diff(changes: &ChangeSet, verbose: bool) {
    println!("{}", render_diff(changes, verbose));
}

pub fn render_diff(changes: &ChangeSet, verbose: bool) -> String {
    if changes.is_empty() {
        return "No differences found.".italic().to_string();
    }

    let summary = changes.summary();
    let mut parts: Vec<String> = Vec::new();
    if summary.inserts > 0 {
        parts.push(format!("insert: {}", summary.inserts.to_string().green()));
    }
    if summary.updates > 0 {
        parts.push(format!("update: {}", summary.updates.to_string().yellow()));
    }
    if summary.deletes > 0 {
        parts.push(format!("delete: {}", summary.deletes.to_string().red()));
    }
    let mut out = format!(
        "{} — rows to {}",
        changes.table_name().bold(),
        parts.join("  ")
    );

    if !verbose {
        return out;
    }

    let columns: Vec<&SchemaColumn> = changes.reference().schema().columns().iter().collect();
    let key_columns: Vec<&SchemaColumn> = changes.reference().schema().pk_columns().collect();

    if !changes.insert_keys().is_empty() {
        out.push_str(&format!("\n\n{}\n", "New records:".bold().green()));
        out.push_str(&records_table(&columns, &changes.insert_records()));
    }

    if !changes.delete_keys().is_empty() {
        out.push_str(&format!("\n\n{}\n", "Deleted records:".bold().red()));
        out.push_str(&keys_table(&key_columns, &changes.delete_records()));
    }

    if !changes.update_keys().is_empty() {
        out.push_str(&format!("\n\n{}\n", "Updated records (new over old):".bold().yellow()));
        let mut stacked: Vec<RecordRef<'_>> = Vec::new();
        for key in changes.update_keys() {
            if let (Some(new), Some(old)) = (
                changes.reference().record(key),
                changes.target().record(key),
            ) {
                stacked.push(new);
                stacked.push(old);
            }
        }
        out.push_str(&records_table(&columns, &stacked));
    }

    out
}

/// Tabulate full rows, numeric and boolean columns right-aligned.
fn records_table(columns: &[&SchemaColumn], records: &[RecordRef<'_>]) -> String {
    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.name.clone()));
    for record in records {
        builder.push_record(columns.iter().map(|c| cell(record.value(&c.name))));
    }
    aligned(builder, columns)
}

/// Tabulate the key columns only (all a delete needs to identify a row).
fn keys_table(key_columns: &[&SchemaColumn], records: &[RecordRef<'_>]) -> String {
    let mut builder = Builder::default();
    builder.push_record(key_columns.iter().map(|c| c.name.clone()));
    for record in records {
        builder.push_record(key_columns.iter().map(|c| cell(record.value(&c.name))));
    }
    aligned(builder, key_columns)
}

fn aligned(builder: Builder, columns: &[&SchemaColumn]) -> String {
    let mut table = builder.build();
    table.with(Style::rounded());
    for (i, column) in columns.iter().enumerate() {
        if column.tag.right_aligned() {
            table.with(Modify::new(Columns::single(i)).with(Alignment::right()));
        }
    }
    table.to_string()
}

fn cell(value: Option<&str>) -> String {
    value.unwrap_or("NULL").to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_summary(changes: &ChangeSet) {
    let summary = changes.summary();
    if summary.total == 0 {
        println!("{}", "No differences found.".italic());
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["metric", "value"]);
    builder.push_record(["inserts".to_string(), summary.inserts.to_string()]);
    builder.push_record(["updates".to_string(), summary.updates.to_string()]);
    builder.push_record(["deletes".to_string(), summary.deletes.to_string()]);
    builder.push_record(["total".to_string(), summary.total.to_string()]);
    let mut table = builder.build();
    table.with(Style::rounded());
    table.with(Modify::new(Columns::single(1)).with(Alignment::right()));
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{Column, PrimaryKey, TableSchema};
    use crate::domain::snapshot::Snapshot;
    use crate::domain::sql_type::TypeTag;

    fn col(position: u32, name: &str, tag: TypeTag) -> Column {
        Column {
            position,
            name: name.to_string(),
            tag,
            size: 0,
            scale: 0,
            nullable: true,
            auto_increment: false,
            remarks: None,
        }
    }

    fn snapshot(rows: &[(&str, i64)]) -> Snapshot {
        let schema = TableSchema::new(
            "items",
            vec![
                col(1, "id", TypeTag::Integer),
                col(2, "label", TypeTag::Varchar),
            ],
            PrimaryKey {
                name: None,
                columns: vec!["id".to_string()],
            },
            vec![],
        )
        .unwrap();
        let mut snap = Snapshot::new(schema, None);
        for (label, id) in rows {
            snap.add_row(vec![Some(id.to_string()), Some(label.to_string())])
                .unwrap();
        }
        snap
    }

    #[test]
    fn empty_diff_renders_no_differences() {
        let changes = snapshot(&[("a", 1)])
            .delta(snapshot(&[("a", 1)]), &[])
            .unwrap();
        assert!(render_diff(&changes, true).contains("No differences found."));
    }

    #[test]
    fn counts_line_lists_only_nonzero_sections() {
        let changes = snapshot(&[("a", 1), ("b", 2)])
            .delta(snapshot(&[("b", 2)]), &[])
            .unwrap();
        let out = render_diff(&changes, false);
        assert!(out.contains("insert: "), "{out}");
        assert!(!out.contains("update: "), "{out}");
        assert!(!out.contains("delete: "), "{out}");
    }

    #[test]
    fn verbose_diff_shows_old_and_new_values() {
        let changes = snapshot(&[("new label", 1)])
            .delta(snapshot(&[("old label", 1)]), &[])
            .unwrap();
        let out = render_diff(&changes, true);
        assert!(out.contains("Updated records"), "{out}");
        assert!(out.contains("new label"), "{out}");
        assert!(out.contains("old label"), "{out}");
    }

    #[test]
    fn verbose_delete_section_shows_key_columns_only() {
        let changes = snapshot(&[])
            .delta(snapshot(&[("gone", 9)]), &[])
            .unwrap();
        let out = render_diff(&changes, true);
        assert!(out.contains("Deleted records"), "{out}");
        assert!(out.contains('9'), "{out}");
        assert!(!out.contains("gone"), "{out}");
    }
}

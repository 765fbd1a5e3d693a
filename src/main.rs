use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;

use rowsync::presentation::console::{print_diff, print_summary};
use rowsync::presentation::writers::{read_snapshot, snapshot_path, write_script, write_snapshot};
use rowsync::{AppConfig, DataSource, DiffService, ExportService, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "rowsync",
    about = "rowsync — snapshot, diff and reconcile your SQL table data."
)]
struct Cli {
    /// Config file; CLI flags override its values
    #[arg(long, default_value = "rowsync.toml")]
    config: PathBuf,

    // ── connection ──
    /// Database driver: postgres, mysql, mariadb or sqlite
    #[arg(long)]
    driver: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Database name (file path for sqlite)
    #[arg(long)]
    dbname: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    password: Option<String>,

    // ── modes ──
    /// Export one table to a snapshot file
    #[arg(short = 'e', long, value_name = "TABLE", group = "mode")]
    export: Option<String>,
    /// Export every table matching a SQL LIKE pattern
    #[arg(short = 'a', long, value_name = "PATTERN", group = "mode")]
    all_tables: Option<String>,
    /// Diff a snapshot file against the live table and apply the changes
    #[arg(short = 'i', long, value_name = "FILE", group = "mode")]
    import: Option<PathBuf>,
    /// Show the diff between a snapshot file and the live table
    #[arg(short = 'd', long, value_name = "FILE", group = "mode")]
    delta: Option<PathBuf>,

    // ── options ──
    /// Where clause scoping an export
    #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
    filter: Option<String>,
    /// Comma-separated columns excluded from update detection
    #[arg(long, value_name = "COLS", value_delimiter = ',')]
    ignore_columns: Vec<String>,
    /// Create the table before importing when it does not exist
    #[arg(short = 'f', long)]
    force_create: bool,
    /// Write the undo script to this file after applying
    #[arg(short = 'u', long, value_name = "FILE")]
    undo_log: Option<PathBuf>,
    /// Keep applying after a failed statement
    #[arg(long)]
    continue_on_error: bool,
    /// Commit after applying (default leaves the transaction open)
    #[arg(short = 'c', long)]
    commit: bool,
    /// Add a capture timestamp to exported file names
    #[arg(long)]
    timestamp: bool,
    /// Apply without asking for confirmation
    #[arg(short = 'y', long)]
    yes: bool,
    /// Directory exported snapshot files are written to
    #[arg(short = 'o', long, default_value = ".")]
    out_dir: PathBuf,

    #[arg(short = 'v', long)]
    verbose: bool,
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LogLevel::Error
    } else if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    rowsync::init_tracing(level);

    let mut cfg = AppConfig::load(&cli.config)?;
    merge_cli(&mut cfg, &cli);

    let db: Arc<dyn DataSource> = Arc::new(rowsync::connect(&cfg.connection).await?);

    if let Some(path) = &cli.delta {
        show_delta(&cfg, db, path).await
    } else if let Some(path) = &cli.import {
        import(&cfg, db, &cli, path).await
    } else if let Some(table) = &cli.export {
        export_one(db, &cli, table).await
    } else if let Some(pattern) = &cli.all_tables {
        export_matching(db, &cli, pattern).await
    } else {
        bail!("no usable parameters given; see --help");
    }
}

fn merge_cli(cfg: &mut AppConfig, cli: &Cli) {
    let conn = &mut cfg.connection;
    if let Some(driver) = &cli.driver {
        conn.driver = driver.clone();
    }
    if let Some(host) = &cli.host {
        conn.host = host.clone();
    }
    if let Some(port) = cli.port {
        conn.port = port;
    }
    if let Some(dbname) = &cli.dbname {
        conn.dbname = dbname.clone();
    }
    if let Some(user) = &cli.user {
        conn.user = user.clone();
    }
    if let Some(password) = &cli.password {
        conn.password = password.clone();
    }

    let diff = &mut cfg.diff;
    if !cli.ignore_columns.is_empty() {
        diff.ignore_columns = cli.ignore_columns.clone();
    }
    diff.continue_on_error |= cli.continue_on_error;
    diff.commit |= cli.commit;
    diff.force_create |= cli.force_create;
}

async fn show_delta(cfg: &AppConfig, db: Arc<dyn DataSource>, path: &PathBuf) -> Result<()> {
    let reference = read_snapshot(path)?;
    let changes = DiffService::new(db)
        .delta_to_live(reference, &cfg.diff.ignore_columns)
        .await?;
    print_diff(&changes, true);
    Ok(())
}

async fn import(cfg: &AppConfig, db: Arc<dyn DataSource>, cli: &Cli, path: &PathBuf) -> Result<()> {
    let reference = read_snapshot(path)?;
    let service = DiffService::new(db);

    if !service
        .ensure_table(reference.schema(), cfg.diff.force_create)
        .await?
    {
        bail!(
            "table {} does not exist (pass --force-create to create it)",
            reference.table_name()
        );
    }

    let changes = service
        .delta_to_live(reference, &cfg.diff.ignore_columns)
        .await?;
    if changes.is_empty() {
        println!("No differences found.");
        return Ok(());
    }

    print_diff(&changes, true);
    if !cli.yes && !confirm("Apply diff to database? [Y/n] ")? {
        println!("Aborted; nothing applied.");
        return Ok(());
    }

    let undo = service
        .apply(&changes, cfg.diff.commit, cfg.diff.continue_on_error)
        .await?;
    print_summary(&changes);

    match &cli.undo_log {
        Some(undo_path) => {
            write_script(undo_path, &undo)?;
            println!("Undo script written to {}", undo_path.display());
        }
        None => {
            println!("-- Undo script:");
            for stmt in &undo {
                println!("{stmt}");
            }
        }
    }
    if !cfg.diff.commit {
        println!("Transaction left open — run with --commit to make changes permanent.");
    }
    Ok(())
}

async fn export_one(db: Arc<dyn DataSource>, cli: &Cli, table: &str) -> Result<()> {
    let snapshot = ExportService::new(db)
        .capture(table, cli.filter.as_deref())
        .await?;
    std::fs::create_dir_all(&cli.out_dir)?;
    let path = snapshot_path(&cli.out_dir, table, cli.timestamp);
    write_snapshot(&path, &snapshot)?;
    println!("Exported table \"{table}\" to {}", path.display());
    Ok(())
}

async fn export_matching(db: Arc<dyn DataSource>, cli: &Cli, pattern: &str) -> Result<()> {
    let snapshots = ExportService::new(db)
        .capture_matching(Some(pattern), cli.filter.as_deref())
        .await?;
    if snapshots.is_empty() {
        println!("No tables match pattern \"{pattern}\".");
        return Ok(());
    }
    std::fs::create_dir_all(&cli.out_dir)?;
    for snapshot in &snapshots {
        let path = snapshot_path(&cli.out_dir, snapshot.table_name(), cli.timestamp);
        // A single unwritable file should not sink the rest of the batch.
        match write_snapshot(&path, snapshot) {
            Ok(()) => println!(
                "Exported table \"{}\" to {}",
                snapshot.table_name(),
                path.display()
            ),
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(answer.is_empty() || answer.eq_ignore_ascii_case("y"))
}

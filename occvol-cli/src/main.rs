//! occvol CLI: keep a local history of daily options volume up to date.
//!
//! Commands:
//! - `update`: backfill and fill the store month by month from the report endpoint
//! - `top`: highest-volume days in the store
//! - `month`: fetch specific months directly and rank their days
//! - `status`: store coverage, row count and parts

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use occvol_core::data::{
    build_records, parse_report, Disposition, MemoryStore, OccReportSource, ParquetStore,
    ReportSource, VolumeRecord, VolumeStore,
};
use occvol_core::reconcile::{MonthOutcome, PhaseReport, PhaseState};
use occvol_core::{
    top_n, Config, MonthCursor, ReconcileSummary, Reconciler, RunLog, TracingLog, OCC_TOTAL,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "occvol",
    about = "occvol CLI: monthly options volume reports in a local store"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "occvol.toml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill and fill the store through the most recently elapsed month.
    Update {
        /// Run against an in-memory copy of the store; nothing is written.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Treat this date (YYYY-MM-DD) as today. Defaults to the local date.
        #[arg(long)]
        today: Option<String>,
    },
    /// Show the highest-volume days in the store.
    Top {
        /// Number of days to show.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Category to rank by.
        #[arg(long, default_value = OCC_TOTAL)]
        column: String,
    },
    /// Fetch the given months (YYYY-MM) directly and show their highest-volume days.
    Month {
        #[arg(required = true)]
        months: Vec<String>,

        /// Number of days to show.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Category to rank by.
        #[arg(long, default_value = OCC_TOTAL)]
        column: String,
    },
    /// Report store coverage, row count and parts.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let config = Config::load_or_default(&cli.config, &TracingLog)?;
    tracing::debug!(
        store = %config.store.dir.display(),
        table = %config.store.table,
        "config loaded"
    );

    match cli.command {
        Commands::Update { dry_run, today } => run_update(&config, dry_run, today),
        Commands::Top { count, column } => run_top(&config, count, &column),
        Commands::Month {
            months,
            count,
            column,
        } => run_month(&config, &months, count, &column),
        Commands::Status => run_status(&config),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid --log-level '{level}'"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn open_store(config: &Config, log: Arc<dyn RunLog>) -> Result<ParquetStore> {
    config.store.validate()?;
    Ok(ParquetStore::new(&config.store.dir, &config.store.table, log))
}

fn open_source(config: &Config, log: Arc<dyn RunLog>) -> Result<OccReportSource> {
    config.source.validate()?;
    Ok(OccReportSource::new(
        &config.source.url,
        &config.source.format,
        config.source.timeout(),
        log,
    )?)
}

fn run_update(config: &Config, dry_run: bool, today: Option<String>) -> Result<()> {
    let today = match today {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .with_context(|| format!("invalid --today '{s}', expected YYYY-MM-DD"))?,
        None => chrono::Local::now().date_naive(),
    };

    let log: Arc<dyn RunLog> = Arc::new(TracingLog);
    let source = open_source(config, log.clone())?;
    let mut store = open_store(config, log.clone())?;

    let summary = if dry_run {
        let mut memory = MemoryStore::with_records(config.store.table.clone(), store.read_all()?);
        Reconciler::new(&source, &mut memory, log.as_ref())
            .with_earliest(config.backfill.earliest_month)
            .run(today)?
    } else {
        Reconciler::new(&source, &mut store, log.as_ref())
            .with_earliest(config.backfill.earliest_month)
            .run(today)?
    };

    print_summary(&summary, dry_run);
    Ok(())
}

fn run_top(config: &Config, count: usize, column: &str) -> Result<()> {
    let store = open_store(config, Arc::new(TracingLog))?;
    let records = store.read_all()?;
    if records.is_empty() {
        println!("No records in {}", store.table_dir().display());
        return Ok(());
    }
    print_top(&records, column, count)
}

fn run_month(config: &Config, months: &[String], count: usize, column: &str) -> Result<()> {
    let targets = months
        .iter()
        .map(|m| parse_month(m))
        .collect::<Result<Vec<_>>>()?;

    let log: Arc<dyn RunLog> = Arc::new(TracingLog);
    let source = open_source(config, log.clone())?;

    let mut records: Vec<VolumeRecord> = Vec::new();
    for month in targets {
        let fetched = source
            .fetch(month)
            .and_then(|raw| parse_report(&raw.text))
            .and_then(|tables| build_records(&tables, Some(records.as_slice())));
        match fetched {
            Ok(merged) => records = merged,
            Err(e) if e.disposition() == Disposition::Skip => {
                log.warning(&format!("Skipping {}: {e}", MonthCursor::of(month)));
            }
            Err(e) => return Err(e.into()),
        }
    }

    if records.is_empty() {
        bail!("no data retrieved for the requested months");
    }
    print_top(&records, column, count)
}

fn run_status(config: &Config) -> Result<()> {
    let store = open_store(config, Arc::new(TracingLog))?;
    let table_dir = store.table_dir();
    if !table_dir.exists() {
        println!("Store does not exist yet: {}", table_dir.display());
        return Ok(());
    }

    let coverage = store.coverage()?;
    println!("Store:    {}", table_dir.display());
    match (coverage.min(), coverage.max()) {
        (Some(min), Some(max)) => println!("Coverage: {min} to {max}"),
        _ => println!("Coverage: (empty)"),
    }
    match store.meta() {
        Some(meta) => {
            println!("Rows:     {}", format_thousands(meta.row_count as u64));
            println!("Parts:    {}", meta.part_count);
            println!("Updated:  {}", meta.updated_at.format("%Y-%m-%d %H:%M:%S"));
            println!("Hash:     {}", meta.data_hash);
        }
        None => println!("(no meta)"),
    }
    Ok(())
}

fn parse_month(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .with_context(|| format!("invalid month '{s}', expected YYYY-MM"))
}

fn print_top(records: &[VolumeRecord], column: &str, count: usize) -> Result<()> {
    if !records.iter().any(|r| r.get(column).is_some()) {
        bail!("no column named '{column}' in the records");
    }

    let ranked = top_n(records, column, count);
    let categories: Vec<String> = ranked
        .first()
        .map(|r| r.categories().map(str::to_string).collect())
        .unwrap_or_default();

    let mut headers = vec!["Rank".to_string(), "Date".to_string()];
    headers.extend(categories.iter().cloned());

    let rows: Vec<Vec<String>> = ranked
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let mut row = vec![(i + 1).to_string(), record.date.to_string()];
            row.extend(
                categories
                    .iter()
                    .map(|c| record.get(c).map(format_thousands).unwrap_or_default()),
            );
            row
        })
        .collect();

    println!("{}", render_table(&headers, &rows));
    Ok(())
}

fn print_summary(summary: &ReconcileSummary, dry_run: bool) {
    println!();
    if dry_run {
        println!("=== Update (dry run, nothing written) ===");
    } else {
        println!("=== Update ===");
    }
    println!("Today:          {}", summary.today);
    println!("Target month:   {}", MonthCursor::of(summary.prev_month));
    match (summary.coverage_before.min(), summary.coverage_before.max()) {
        (Some(min), Some(max)) => println!("Coverage was:   {min} to {max}"),
        _ => println!("Coverage was:   (empty)"),
    }
    match &summary.bootstrap {
        Some(MonthOutcome::Appended { month, rows }) => {
            println!("Bootstrap:      {} ({rows} rows)", MonthCursor::of(*month))
        }
        Some(MonthOutcome::Skipped { month, .. }) => {
            println!("Bootstrap:      {} skipped", MonthCursor::of(*month))
        }
        None => {}
    }
    print_phase("Backfill", &summary.backward);
    print_phase("Fill", &summary.forward);
    println!(
        "Rows written:   {}",
        format_thousands(summary.rows_written() as u64)
    );

    let skipped = summary.skipped();
    if !skipped.is_empty() {
        println!();
        println!("--- Skipped months ---");
        for (month, reason) in &skipped {
            println!("{:<15} {reason}", MonthCursor::of(*month).to_string());
        }
    }
    println!();
}

fn print_phase(label: &str, phase: &PhaseReport) {
    let state = match phase.state {
        PhaseState::Skipped => "not needed".to_string(),
        _ => format!(
            "{} attempted, {} appended, {} skipped",
            phase.attempted,
            phase.appended,
            phase.skipped.len()
        ),
    };
    println!("{:<15} {state}", format!("{label}:"));
}

fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Bordered table: text columns left-aligned, numeric columns right-aligned.
fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .filter_map(|r| r.get(i))
                .map(String::len)
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();
    let numeric: Vec<bool> = (0..headers.len())
        .map(|i| {
            rows.iter().filter_map(|r| r.get(i)).all(|cell| {
                !cell.is_empty() && cell.chars().all(|c| c.is_ascii_digit() || c == ',')
            })
        })
        .collect();

    let border = |joint: char| {
        let cells: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("{joint}{}{joint}", cells.join(&joint.to_string()))
    };
    let line = |cells: &[String], align_numbers: bool| {
        let padded: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                if align_numbers && numeric[i] {
                    format!(" {cell:>w$} ")
                } else {
                    format!(" {cell:<w$} ")
                }
            })
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let rule = border('+');
    let mut out = vec![rule.clone(), line(headers, false)];
    out.push(format!("|{}|", &rule[1..rule.len() - 1]));
    out.extend(rows.iter().map(|r| line(r, true)));
    out.push(rule);
    out.join("\n")
}

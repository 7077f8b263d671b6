//! citevo - citation timeframe aggregation over INSPIRE-HEP
//!
//! Counts which works the most cited papers of each period reference and
//! tracks those counts across periods.
//!
//! ## Usage
//!
//! ### Full series
//! ```bash
//! citevo run --start-date 2022-01-01 --end-date 2024-08-01 --step-back 2 --percent-change
//! ```
//!
//! ### Replay a snapshot
//! ```bash
//! citevo replay --snapshot ./snapshot.json --chart bubble
//! ```
//!
//! ### Chart an exported table
//! ```bash
//! citevo plot final_output.csv --chart scatter
//! ```

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use clap::{Args, Parser, Subcommand};
use citevo::chart::{prepare_chart, ChartKind};
use citevo::details::attach_details;
use citevo::flatten::parse_field_specs;
use citevo::inspire::{ClientConfig, IdentifierRange, InspireClient, DEFAULT_MAX_CONCURRENT};
use citevo::period::{parse_date, period_containing, validate_step, Period};
use citevo::pipeline::{Pipeline, PipelineConfig, SeriesResult, DEFAULT_FIELDS};
use citevo::snapshot::{resolve_snapshot_path, Snapshot};
use citevo::table::AggregateTable;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Citation timeframe aggregation over the INSPIRE-HEP literature API
#[derive(Parser)]
#[command(name = "citevo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, aggregate and merge citation counts per period
    Run {
        /// Earliest date of the range (YYYY-MM-DD or YYYY-MM)
        #[arg(long, default_value = "2020-04-01")]
        start_date: String,

        /// Latest date of the range (default: today)
        #[arg(long)]
        end_date: Option<String>,

        /// Period width in months (1, 2, 3, 4, 6 or 12)
        #[arg(long, default_value = "2")]
        step_back: u32,

        /// Only process the period containing the end date
        #[arg(long)]
        process_single_timeframe: bool,

        /// Pages fetched per period
        #[arg(long, default_value = "1")]
        pages: u32,

        /// Records per page
        #[arg(long, default_value = "200")]
        page_size: usize,

        /// Page requests in flight at once
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT)]
        concurrency: usize,

        /// Restrict to a control-number range (e.g., "1000->2000")
        #[arg(long)]
        control_number_range: Option<String>,

        /// Look up title and preprint date for the top N rows
        #[arg(long)]
        details: Option<usize>,

        /// Save raw responses here for later replay
        /// (default: <cache dir>/citevo/snapshot.json)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Rebuild the table from a saved snapshot without network access
    Replay {
        /// Snapshot file (default: <cache dir>/citevo/snapshot.json)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Write chart series JSON for an exported table
    Plot {
        /// Wide-table CSV produced by `run` or `replay`
        input: PathBuf,

        /// Chart kind
        #[arg(long, default_value = "bar", value_parser = ["bar", "bubble", "scatter"])]
        chart: String,

        /// Number of rows to chart
        #[arg(long, default_value = "20")]
        top: usize,

        /// Output JSON (default: chart_<kind>.json next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Aggregation and output flags shared by `run` and `replay`
#[derive(Args)]
struct OutputArgs {
    /// Write one CSV of papers per period
    #[arg(long)]
    generate_csvs: bool,

    /// File name of the merged table
    #[arg(long, default_value = "final_output.csv")]
    output_file: String,

    /// Output directory
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Flattening worker threads (default: available cores)
    #[arg(long)]
    workers: Option<usize>,

    /// How identifiers first seen in later periods are handled
    #[arg(long, default_value = "left", value_parser = ["left", "outer"])]
    join: String,

    /// Add ratio columns relative to the most recent period
    #[arg(long)]
    percent_change: bool,

    /// Chart series to write alongside the table
    #[arg(long, default_value = "none", value_parser = ["bar", "bubble", "scatter", "none"])]
    chart: String,

    /// Rows included in the chart
    #[arg(long, default_value = "20")]
    chart_top: usize,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Run {
            start_date,
            end_date,
            step_back,
            process_single_timeframe,
            pages,
            page_size,
            concurrency,
            control_number_range,
            details,
            snapshot,
            output,
        } => {
            run_pipeline(RunOptions {
                start_date,
                end_date,
                step_back,
                process_single_timeframe,
                pages,
                page_size,
                concurrency,
                control_number_range,
                details,
                snapshot,
                output,
            })
            .await
        }
        Commands::Replay { snapshot, output } => run_replay(snapshot, output),
        Commands::Plot {
            input,
            chart,
            top,
            output,
        } => run_plot(&input, &chart, top, output),
    }
}

// ============================================================================
// Run
// ============================================================================

struct RunOptions {
    start_date: String,
    end_date: Option<String>,
    step_back: u32,
    process_single_timeframe: bool,
    pages: u32,
    page_size: usize,
    concurrency: usize,
    control_number_range: Option<String>,
    details: Option<usize>,
    snapshot: Option<PathBuf>,
    output: OutputArgs,
}

async fn run_pipeline(opts: RunOptions) -> Result<()> {
    // Everything below is validated before the first request
    validate_step(opts.step_back)?;
    let earliest = parse_date(&opts.start_date).context("Invalid --start-date")?;
    let latest = match &opts.end_date {
        Some(s) => parse_date(s).context("Invalid --end-date")?,
        None => Local::now().date_naive(),
    };
    let id_range = opts
        .control_number_range
        .as_deref()
        .map(IdentifierRange::parse)
        .transpose()
        .context("Invalid --control-number-range")?;
    let snapshot_path = resolve_snapshot_path(opts.snapshot.clone())?;

    let mut config = pipeline_config(&opts.output, opts.step_back)?;
    config.page_count = opts.pages;
    config.page_size = opts.page_size;
    config.max_concurrent = opts.concurrency;
    config.id_range = id_range;

    let client = InspireClient::new(ClientConfig::default())?;
    let pipeline = Pipeline::new(client, config)?;

    let (mut table, labels, snapshot) = if opts.process_single_timeframe {
        let period = period_containing(latest, opts.step_back)?;
        info!(period = %period, "Processing single timeframe");
        let result = pipeline.process_single_timeframe(period).await?;
        if !result.failed_pages.is_empty() {
            warn!(failed = ?result.failed_pages, "Some pages failed");
        }
        let label = period.label();
        let table = AggregateTable::from_counts(&result.counts, &label);
        let mut snapshot = Snapshot::default();
        snapshot.push(period, result.pages);
        (table, vec![label], snapshot)
    } else {
        info!(from = %latest, to = %earliest, step = opts.step_back, "Processing timeframe series");
        let series = pipeline.process_timeframe_series(latest, earliest).await?;
        let labels = series.period_labels();
        let SeriesResult {
            table, snapshot, ..
        } = series;
        (table, labels, snapshot)
    };

    if let Some(limit) = opts.details {
        table = attach_details(table, pipeline.source(), limit, opts.concurrency).await?;
    }

    write_outputs(table, &labels, &opts.output)?;

    snapshot.save(&snapshot_path).context("Failed to save snapshot")?;

    println!("\n✓ Pipeline complete. Results in: {}", opts.output.output_dir.display());
    Ok(())
}

fn pipeline_config(output: &OutputArgs, step_months: u32) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::new(parse_field_specs(DEFAULT_FIELDS)?);
    config.step_months = step_months;
    config.join = output.join.parse()?;
    if let Some(workers) = output.workers {
        config.flatten_workers = workers;
    }
    if output.generate_csvs {
        config.export_dir = Some(output.output_dir.clone());
    }
    Ok(config)
}

/// Percent change, merged table CSV and optional chart
fn write_outputs(table: AggregateTable, labels: &[String], output: &OutputArgs) -> Result<()> {
    let table = if output.percent_change {
        table.derive_percentage_change(labels)?
    } else {
        table
    };

    std::fs::create_dir_all(&output.output_dir).context("Failed to create output directory")?;
    let table_path = output.output_dir.join(&output.output_file);
    table.save_csv(&table_path).context("Failed to write merged table")?;
    println!("Saved: {:?} ({} identifiers)", table_path, table.len());

    if output.chart != "none" {
        let kind: ChartKind = output.chart.parse()?;
        let series = prepare_chart(kind, &table, output.chart_top)?;
        let chart_path = output.output_dir.join(format!("chart_{}.json", kind));
        series.save_json(&chart_path)?;
        println!("Saved: {:?}", chart_path);
    }

    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

fn run_replay(snapshot: Option<PathBuf>, output: OutputArgs) -> Result<()> {
    let path = resolve_snapshot_path(snapshot)?;
    let snapshot = Snapshot::load(&path)
        .with_context(|| format!("Failed to load snapshot {:?}", path))?;

    // The step width only matters for enumeration, which a replay skips
    let step = snapshot
        .periods
        .first()
        .map(|p| period_width(&p.period))
        .unwrap_or(2);
    let config = pipeline_config(&output, step)?;
    let client = InspireClient::new(ClientConfig::default())?;
    let pipeline = Pipeline::new(client, config)?;

    let series = pipeline.replay_snapshot(&snapshot)?;
    let labels = series.period_labels();
    write_outputs(series.table, &labels, &output)?;

    println!("\n✓ Replay complete. Results in: {}", output.output_dir.display());
    Ok(())
}

fn period_width(period: &Period) -> u32 {
    let months = (period.end().year() - period.start().year()) * 12
        + period.end().month() as i32
        - period.start().month() as i32
        + 1;
    months.max(1) as u32
}

// ============================================================================
// Plot
// ============================================================================

fn run_plot(input: &Path, chart: &str, top: usize, output: Option<PathBuf>) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file not found: {:?}", input);
    }

    let table = AggregateTable::load_csv(input)
        .with_context(|| format!("Failed to read table {:?}", input))?;
    let kind: ChartKind = chart.parse()?;
    let series = prepare_chart(kind, &table, top)?;

    let path = output.unwrap_or_else(|| {
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("chart_{}.json", kind))
    });
    series.save_json(&path)?;
    println!("Saved: {:?}", path);
    Ok(())
}

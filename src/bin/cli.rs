use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use episurv::analytics::ConsolidatedRow;
use episurv::config::{global_config, set_global_config};
use episurv::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "epicli")]
#[command(about = "Epidemiological surveillance CLI - weekly pivots, summaries and notification reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show row counts of the loaded sources
    Stats(SourceArgs),
    /// Weekly series of one indicator per facility or region
    Pivot(PivotArgs),
    /// Per-facility counts for one week
    Summary(SummaryArgs),
    /// List the region labels found in the roster
    Regions(SourceArgs),
    /// Report roster rows without code and repeated codes
    Duplicates(SourceArgs),
    /// Write the weekly notification report
    Report(ReportArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Directory containing the source CSV files (overrides uploads/seed resolution)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
    /// Configuration file (TOML)
    #[arg(short, long, env = "EPI_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct PivotArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Reporting year
    #[arg(long)]
    year: i32,
    /// Indicator: EDA, IRA, NEU, SOBASMA or FEB
    #[arg(long, default_value = "EDA")]
    indicator: String,
    /// Grouping: estab or ris
    #[arg(long, default_value = "estab")]
    group_by: String,
    /// First epidemiological week
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    week_start: i32,
    /// Last epidemiological week
    #[arg(long, default_value_t = 53, allow_negative_numbers = true)]
    week_end: i32,
    /// Region filter
    #[arg(long)]
    region: Option<String>,
}

#[derive(Args)]
struct SummaryArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Reporting year
    #[arg(long)]
    year: i32,
    /// Epidemiological week
    #[arg(long)]
    week: i32,
    /// Region filter
    #[arg(long)]
    region: Option<String>,
    /// Only list facilities that reported rows in the week
    #[arg(long)]
    reporters_only: bool,
}

#[derive(Args)]
struct ReportArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Reporting year
    #[arg(long)]
    year: i32,
    /// Epidemiological week
    #[arg(long)]
    week: i32,
    /// Region filter
    #[arg(long)]
    region: Option<String>,
    /// Area code (ubigeo) prefix, only used with --rows
    #[arg(long)]
    area_code: Option<String>,
    /// JSON file with consolidated rows; without it the report is built from the week summary
    #[arg(long)]
    rows: Option<PathBuf>,
    /// Output file (defaults to the configured report path)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Output format (defaults to the configured format)
    #[arg(long, value_enum)]
    format: Option<ReportFormatOpt>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ReportFormatOpt {
    Csv,
    Json,
}

impl From<ReportFormatOpt> for ExportFormat {
    fn from(opt: ReportFormatOpt) -> Self {
        match opt {
            ReportFormatOpt::Csv => ExportFormat::Csv,
            ReportFormatOpt::Json => ExportFormat::Json,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Stats(args) => cmd_stats(args),
        Commands::Pivot(args) => cmd_pivot(args),
        Commands::Summary(args) => cmd_summary(args),
        Commands::Regions(args) => cmd_regions(args),
        Commands::Duplicates(args) => cmd_duplicates(args),
        Commands::Report(args) => cmd_report(args),
    };

    if let Err(e) = result {
        match e.downcast_ref::<EpiError>() {
            Some(epi) => eprintln!("Error: {}", epi.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

/// Resolve configuration, install logging and open the snapshot cache
fn open_cache(args: &SourceArgs) -> Result<(EpiConfig, SnapshotCache)> {
    let config = match &args.config {
        Some(path) => EpiConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => global_config(),
    };
    init_tracing(&config.log_level);

    let mut cache = SnapshotCache::from_config(&config);
    if let Some(dir) = &args.data_dir {
        cache = SnapshotCache::new(SourceLocator::fixed(dir))
            .with_reader(SourceReader::new().with_max_line_length(config.max_line_length))
            .with_parallel_load(config.parallel_load);
    }
    tracing::debug!(directory = %cache.source_directory().display(), "resolved source directory");

    set_global_config(config.clone());
    Ok((config, cache))
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // a second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_stats(args: SourceArgs) -> Result<()> {
    let (_, cache) = open_cache(&args)?;
    let snapshot = cache.get_snapshot();
    snapshot.statistics().print_summary();
    Ok(())
}

fn cmd_pivot(args: PivotArgs) -> Result<()> {
    let (_, cache) = open_cache(&args.source)?;
    let query = PivotQuery::from_params(
        args.year,
        &args.indicator,
        &args.group_by,
        args.week_start,
        args.week_end,
        args.region.as_deref(),
    )?;
    let snapshot = cache.get_snapshot();
    print_json(&snapshot.analytics().pivot(&query))
}

fn cmd_summary(args: SummaryArgs) -> Result<()> {
    let (_, cache) = open_cache(&args.source)?;
    let mut query = SummaryQuery::new(args.year, args.week).include_all(!args.reporters_only);
    if let Some(region) = args.region.as_deref() {
        query = query.region(region);
    }
    let snapshot = cache.get_snapshot();
    print_json(&snapshot.analytics().summary(&query)?)
}

fn cmd_regions(args: SourceArgs) -> Result<()> {
    let (_, cache) = open_cache(&args)?;
    let snapshot = cache.get_snapshot();
    print_json(&snapshot.analytics().region_options())
}

fn cmd_duplicates(args: SourceArgs) -> Result<()> {
    let (_, cache) = open_cache(&args)?;
    let snapshot = cache.get_snapshot();
    print_json(&snapshot.analytics().roster_issues())
}

fn cmd_report(args: ReportArgs) -> Result<()> {
    let (config, cache) = open_cache(&args.source)?;
    let snapshot = cache.get_snapshot();
    let analytics = snapshot.analytics();

    let report = match &args.rows {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading consolidated rows from {}", path.display()))?;
            let rows: Vec<ConsolidatedRow> = serde_json::from_str(&text)
                .with_context(|| format!("parsing consolidated rows in {}", path.display()))?;
            let request = ReportRequest {
                year: args.year,
                week: args.week,
                area_code: args.area_code.clone(),
                region: args.region.clone(),
                rows,
            };
            analytics.notification_report(&request)?
        }
        None => {
            let mut query = SummaryQuery::new(args.year, args.week);
            if let Some(region) = args.region.as_deref() {
                query = query.region(region);
            }
            NotificationReport::from(&analytics.summary(&query)?)
        }
    };

    let format = args.format.map(ExportFormat::from).unwrap_or(config.report_format);
    let output = args.output.unwrap_or_else(|| config.report_path());
    report.export(&output, format)?;

    println!(
        "Wrote {} report for week {}/{} to {} ({} notified, {} not notified)",
        format,
        report.week,
        report.year,
        output.display(),
        report.notified_count,
        report.non_notified_count
    );
    Ok(())
}

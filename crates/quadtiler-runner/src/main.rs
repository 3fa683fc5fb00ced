//! `quadtiler` command line runner.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use quadtiler_runner::{RetileConfig, RetileError, RetileReport, Retiler};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "quadtiler")]
#[command(author, version, about = "Retile basemap quads onto a destination tile grid", long_about = None)]
struct Cli {
    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the retiler described by a YAML config
    Run {
        /// Config file with a `retiler:` section
        #[arg(short, long)]
        config: PathBuf,
        /// Override the worker count
        #[arg(short, long)]
        workers: Option<usize>,
        /// Only process these dates (repeatable)
        #[arg(short, long = "date")]
        dates: Vec<String>,
        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Check a config and its inputs without processing anything
    Check {
        /// Config file with a `retiler:` section
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    quadtiler_metrics::describe_metrics();

    let result = match cli.command {
        Commands::Run {
            config,
            workers,
            dates,
            report,
        } => run(config, workers, dates, report),
        Commands::Check { config } => check(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load(config: &Path) -> Result<RetileConfig, Box<dyn std::error::Error>> {
    let config = RetileConfig::from_file(config)?;
    info!(catalog = %config.catalog.display(), grid = %config.grid.display(), "Loaded configuration");
    Ok(config)
}

fn check(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(&config)?;
    let settings = config.settings()?;
    let catalog = config.load_catalog().map_err(RetileError::from)?;
    let grid = config.load_grid().map_err(RetileError::from)?;
    println!("Catalog: {} quads, dates {:?}", catalog.len(), catalog.dates());
    println!("Grid: {} tiles in {}", grid.len(), grid.crs());
    println!(
        "Output: {} ({}x{}, {} bands, {})",
        settings.output_pattern.as_str(),
        settings.dst_width,
        settings.dst_height,
        settings.bands,
        settings.dst_crs
    );
    Ok(())
}

fn run(
    config: PathBuf,
    workers: Option<usize>,
    dates: Vec<String>,
    report_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(&config)?;
    let mut settings = config.settings()?;
    if let Some(workers) = workers {
        settings.workers = workers;
    }
    if !dates.is_empty() {
        settings.dates = dates;
    }

    let catalog = config.load_catalog().map_err(RetileError::from)?;
    let grid = config.load_grid().map_err(RetileError::from)?;

    let started = Local::now();
    let retiler = Retiler::new(settings, config.codec.build());
    let report = retiler.run(&catalog, &grid)?;
    let finished = Local::now();

    print_summary(&report, started, finished);
    if let Some(path) = report_path {
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!(path = %path.display(), "Wrote run report");
    }
    Ok(())
}

fn print_summary(report: &RetileReport, started: chrono::DateTime<Local>, finished: chrono::DateTime<Local>) {
    let elapsed = finished - started;
    println!();
    println!("Run started:  {}", started.format("%Y-%m-%d %H:%M:%S"));
    println!("Run finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    println!("Elapsed:      {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    println!("Dates:        {}", report.dates.join(", "));
    println!(
        "Units:        {} completed, {} skipped, {} empty, {} failed",
        report.completed(),
        report.skipped(),
        report.empty(),
        report.failed()
    );
    if !report.errors.is_empty() {
        println!("Errors:");
        match serde_json::to_string_pretty(&report.errors) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize error ledger: {e}"),
        }
    }
}

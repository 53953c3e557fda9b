//! EcomLens: e-commerce analytics dashboard CLI
//!
//! Loads the dataset, runs the four aggregators, prints every table and
//! renders the charts.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ecomlens::{load_tables, viz, Args, DashboardReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    let start_time = Instant::now();

    // Step 1: Load and validate the tables
    info!(data_dir = %args.data_dir.display(), "loading dataset");
    let tables = load_tables(&args.data_dir)
        .with_context(|| format!("failed to load dataset from {}", args.data_dir.display()))?;
    for (table, rows) in tables.row_counts() {
        info!(table, rows, "table ready");
    }

    // Step 2: Run the aggregators
    let options = args.report_options()?;
    let report_start = Instant::now();
    let report = DashboardReport::build(&tables, &options)?;
    info!(elapsed_s = report_start.elapsed().as_secs_f64(), "aggregation finished");

    // Step 3: Render
    report.print(args.preview);

    if let Some(path) = &args.json {
        report
            .write_json(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    if !args.no_charts {
        let written = viz::generate_dashboard_charts(&report, &args.output_dir)?;
        info!(files = written.len(), dir = %args.output_dir.display(), "charts generated");
    }

    println!("\n=== Dashboard Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

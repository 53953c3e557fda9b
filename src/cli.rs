//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::geo::{GeoJoin, DEFAULT_TOP_N};
use crate::report::ReportOptions;

/// E-commerce analytics dashboard: best sellers, spending tiers, order
/// locations and RFM segments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding the six dataset CSV files
    #[arg(short, long, env = "ECOMLENS_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Directory for charts and the map point export
    #[arg(short, long, default_value = "dashboard_out")]
    pub output_dir: PathBuf,

    /// Product category for the monthly trend view
    #[arg(short, long)]
    pub category: Option<String>,

    /// Number of locations in the geographic ranking
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// Join every geolocation row of a zip prefix instead of one per prefix
    #[arg(long)]
    pub geo_fan_out: bool,

    /// Rows shown for long tables
    #[arg(long, default_value = "5")]
    pub preview: usize,

    /// Write the full report as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Skip chart rendering
    #[arg(long)]
    pub no_charts: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn geo_join(&self) -> GeoJoin {
        if self.geo_fan_out {
            GeoJoin::FanOut
        } else {
            GeoJoin::FirstPerPrefix
        }
    }

    /// Aggregation options carried by these arguments
    pub fn report_options(&self) -> anyhow::Result<ReportOptions> {
        if self.top_n == 0 {
            anyhow::bail!("--top-n must be at least 1");
        }

        Ok(ReportOptions {
            top_n: self.top_n,
            geo_join: self.geo_join(),
            category: self.category.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["ecomlens"]);
        assert_eq!(args.top_n, 10);
        assert_eq!(args.preview, 5);
        assert_eq!(args.geo_join(), GeoJoin::FirstPerPrefix);
        assert!(args.json.is_none());
        assert!(!args.no_charts);
    }

    #[test]
    fn test_report_options() {
        let args = Args::parse_from([
            "ecomlens",
            "--data-dir",
            "data",
            "--category",
            "toys",
            "--top-n",
            "3",
            "--geo-fan-out",
        ]);

        let options = args.report_options().unwrap();
        assert_eq!(options.top_n, 3);
        assert_eq!(options.geo_join, GeoJoin::FanOut);
        assert_eq!(options.category.as_deref(), Some("toys"));
        assert_eq!(args.data_dir, PathBuf::from("data"));

        let args = Args::parse_from(["ecomlens", "--top-n", "0"]);
        assert!(args.report_options().is_err());
    }
}

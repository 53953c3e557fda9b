//! Error taxonomy for loading and aggregating the order tables

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised by the loading layer and the aggregators
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A required column is absent from one of the input tables
    #[error("table `{table}` is missing required column `{column}`")]
    Schema {
        table: &'static str,
        column: &'static str,
    },

    /// The data cannot support the requested computation
    #[error("insufficient data: {0}")]
    DataInsufficient(String),

    #[error("order `{order_id}` has an unparseable purchase timestamp `{value}`")]
    Timestamp { order_id: String, value: String },

    /// Monthly trend requested for a category that never sold
    #[error("unknown product category `{0}`")]
    UnknownCategory(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

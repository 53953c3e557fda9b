//! EcomLens: descriptive analytics over an e-commerce order dataset
//!
//! Four independent reports are computed from the raw order tables:
//! best-selling products per year with category trends, customer spending
//! tiers, the busiest order locations, and RFM (Recency, Frequency,
//! Monetary) customer metrics. Every aggregator borrows its input frames and
//! returns freshly built results.

pub mod cli;
pub mod data;
pub mod error;
pub mod geo;
pub mod report;
pub mod rfm;
pub mod sales;
pub mod spending;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_tables, order_timeline, Tables};
pub use error::AnalyticsError;
pub use geo::{map_points, top_cities, top_locations, CityOrders, GeoJoin, GeoOrderCount};
pub use report::{DashboardReport, ReportOptions};
pub use rfm::{compute_rfm, segment_customers, segment_summary, RfmRecord, RfmSegment, ScoredCustomer};
pub use sales::{analyze_sales, monthly_sales, CategoryTrend, MonthlySales, SalesReport, YearlyProductSales};
pub use spending::{classify_spending, CustomerSpending, SpendingReport, SpendingTier, TierSummary};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalyticsError>;

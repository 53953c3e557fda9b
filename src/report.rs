//! Full dashboard report: runs every aggregator and renders the results

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::data::Tables;
use crate::error::AnalyticsError;
use crate::geo::{top_cities, top_locations, CityOrders, GeoJoin, GeoOrderCount, DEFAULT_TOP_N};
use crate::rfm::{compute_rfm, segment_customers, segment_summary, ScoredCustomer, SegmentSummary};
use crate::sales::{analyze_sales, monthly_sales, MonthlySales, SalesReport};
use crate::spending::{classify_spending, SpendingReport};

/// Knobs of a dashboard run
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub top_n: usize,
    pub geo_join: GeoJoin,
    /// Category for the monthly trend view; the first category when unset
    pub category: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            geo_join: GeoJoin::default(),
            category: None,
        }
    }
}

/// Every table the dashboard shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub sales: SalesReport,
    pub monthly: MonthlySales,
    /// Category shown in the monthly trend view, `None` when nothing sold
    pub selected_category: Option<String>,
    /// `None` when the spending distribution cannot fill all three tiers
    pub spending: Option<SpendingReport>,
    /// Why the spending section is missing
    pub spending_unavailable: Option<String>,
    pub top_locations: Vec<GeoOrderCount>,
    pub top_cities: Vec<CityOrders>,
    pub rfm: Vec<ScoredCustomer>,
    pub segments: Vec<SegmentSummary>,
}

impl DashboardReport {
    /// Run the four aggregators over `tables`
    pub fn build(tables: &Tables, options: &ReportOptions) -> crate::Result<Self> {
        let sales = analyze_sales(&tables.order_items, &tables.orders, &tables.products)?;
        let monthly = monthly_sales(&tables.order_items, &tables.orders, &tables.products)?;

        let selected_category = match &options.category {
            Some(category) if monthly.counts.contains_key(category) => Some(category.clone()),
            Some(category) => return Err(AnalyticsError::UnknownCategory(category.clone())),
            None => monthly.categories().next().map(str::to_string),
        };

        let (spending, spending_unavailable) =
            match classify_spending(&tables.order_items, &tables.payments, &tables.orders) {
                Ok(spending) => (Some(spending), None),
                Err(AnalyticsError::DataInsufficient(reason)) => {
                    warn!(%reason, "spending tiers skipped");
                    (None, Some(reason))
                }
                Err(err) => return Err(err),
            };

        let top_locations = top_locations(
            &tables.orders,
            &tables.geolocation,
            &tables.customers,
            options.top_n,
            options.geo_join,
        )?;
        let top_cities = top_cities(&top_locations);

        let rfm = segment_customers(&compute_rfm(
            &tables.orders,
            &tables.order_items,
            &tables.payments,
            &tables.customers,
        )?);
        let segments = segment_summary(&rfm)?;

        info!(
            years = sales.best_sellers.len(),
            customers = spending.as_ref().map_or(0, |spending| spending.customers.len()),
            locations = top_locations.len(),
            rfm_customers = rfm.len(),
            "dashboard report built"
        );

        Ok(Self {
            sales,
            monthly,
            selected_category,
            spending,
            spending_unavailable,
            top_locations,
            top_cities,
            rfm,
            segments,
        })
    }

    /// Month-by-month sales of the selected category
    pub fn selected_series(&self) -> crate::Result<Vec<(String, i64)>> {
        match &self.selected_category {
            Some(category) => self.monthly.series(category),
            None => Ok(Vec::new()),
        }
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Print every table to stdout, showing at most `preview` rows of long tables
    pub fn print(&self, preview: usize) {
        println!("\n=== Best-Selling Products Per Year ===");
        println!("  {:>4} | {:<34} | {:<32} | {:>5}", "Year", "Product", "Category", "Sales");
        for row in &self.sales.best_sellers {
            println!(
                "  {:>4} | {:<34} | {:<32} | {:>5}",
                row.year,
                row.product_id,
                row.category.as_deref().unwrap_or("-"),
                row.sales_count
            );
        }

        if let Some(category) = &self.selected_category {
            println!("\n=== Monthly Sales: {} ===", category);
            match self.selected_series() {
                Ok(series) => {
                    for (month, count) in series {
                        println!("  {}  {:>6}", month, count);
                    }
                }
                Err(err) => warn!(%category, error = %err, "monthly series unavailable"),
            }
        }

        for (title, trends) in [
            ("Products with Increasing Trend", &self.sales.increasing),
            ("Products with Declining Trend", &self.sales.declining),
        ] {
            println!("\n=== {} ({} categories) ===", title, trends.len());
            for trend in trends.iter().take(preview) {
                let yearly: Vec<String> = trend
                    .yearly_sales
                    .iter()
                    .map(|(year, count)| format!("{year}:{count}"))
                    .collect();
                println!(
                    "  {:<32} {:>+8.3}  [{}]",
                    trend.category,
                    trend.trend.unwrap_or(0.0),
                    yearly.join(", ")
                );
            }
        }

        match &self.spending {
            Some(spending) => print_spending(spending, preview),
            None => println!(
                "\n=== Customer Spending Distribution ===\n  unavailable: {}",
                self.spending_unavailable.as_deref().unwrap_or("no data")
            ),
        }

        println!("\n=== Top Geographical Locations ===");
        for location in &self.top_locations {
            println!(
                "  {:<28} {:<3} {:>11.6} {:>11.6} {:>7}",
                location.city, location.state, location.lat, location.lng, location.order_count
            );
        }

        println!("\n=== Top Cities by Orders ===");
        for city in &self.top_cities {
            println!("  {:<28} {:>7}", city.city, city.order_count);
        }

        println!("\n=== RFM Segments ({} customers) ===", self.rfm.len());
        println!(
            "  {:<12} | {:>9} | {:>8} | {:>9} | {:>10}",
            "Segment", "Customers", "Recency", "Frequency", "Monetary"
        );
        for segment in &self.segments {
            println!(
                "  {:<12} | {:>9} | {:>8.1} | {:>9.2} | {:>10.2}",
                segment.segment.label(),
                segment.customers,
                segment.mean_recency,
                segment.mean_frequency,
                segment.mean_monetary
            );
        }
    }
}

fn print_spending(spending: &SpendingReport, preview: usize) {
    println!("\n=== Customer Spending Distribution ===");
    for customer in spending.customers.iter().take(preview) {
        println!(
            "  {:<34} {:>12.2}  {}",
            customer.customer_id, customer.total_spending, customer.spending_tier
        );
    }

    println!("\n=== Spending Tier Summary ===");
    println!(
        "  {:<16} | {:>10} | {:>10} | {:>10} | {:>14} | {:>7}",
        "Tier", "Mean", "Min", "Max", "Sum", "Count"
    );
    for tier in &spending.summary {
        println!(
            "  {:<16} | {:>10.2} | {:>10.2} | {:>10.2} | {:>14.2} | {:>7}",
            tier.tier.label(),
            tier.mean,
            tier.min,
            tier.max,
            tier.sum,
            tier.count
        );
    }
}

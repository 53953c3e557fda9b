//! Chart rendering using Plotters, plus the map point export

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Result;
use plotters::prelude::*;
use polars::prelude::{CsvWriter, SerWriter};
use tracing::info;

use crate::geo::{map_points, CityOrders};
use crate::report::DashboardReport;
use crate::sales::YearlyProductSales;
use crate::spending::TierSummary;

/// Color palette for bars
const BAR_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, YELLOW, MAGENTA];

/// Label of the bar centred on `x`, empty between bars
fn label_at(labels: &[String], x: f64) -> String {
    let index = x.round();
    if index < 0.0 || (x - index).abs() > 1e-6 {
        return String::new();
    }
    labels.get(index as usize).cloned().unwrap_or_default()
}

/// Draw a vertical bar chart with one labelled bar per value
fn draw_bar_chart(
    output_path: &Path,
    title: &str,
    axes: (&str, &str),
    labels: &[String],
    values: &[f64],
) -> Result<()> {
    let max_value = values.iter().copied().fold(0.0_f64, f64::max).max(1.0);

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(labels.len() as f64 - 0.5), 0f64..(max_value * 1.1))?;

    let formatter = |x: &f64| label_at(labels, *x);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&formatter)
        .x_desc(axes.0)
        .y_desc(axes.1)
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, &value)| {
        let color = BAR_COLORS[i % BAR_COLORS.len()];
        Rectangle::new(
            [(i as f64 - 0.4, 0.0), (i as f64 + 0.4, value)],
            color.filled(),
        )
    }))?;

    root.present()?;
    info!(path = %output_path.display(), "chart saved");
    Ok(())
}

/// Bar chart of the best seller's sales count per year
pub fn create_best_seller_chart(best_sellers: &[YearlyProductSales], output_path: &Path) -> Result<()> {
    let labels: Vec<String> = best_sellers.iter().map(|row| row.year.to_string()).collect();
    let values: Vec<f64> = best_sellers.iter().map(|row| row.sales_count as f64).collect();
    draw_bar_chart(
        output_path,
        "Best-Selling Products Per Year",
        ("Year", "Sales Count"),
        &labels,
        &values,
    )
}

/// Line chart of one category's monthly sales
pub fn create_monthly_trend_chart(
    category: &str,
    series: &[(String, i64)],
    output_path: &Path,
) -> Result<()> {
    let months: Vec<String> = series.iter().map(|(month, _)| month.clone()).collect();
    let max_count = series.iter().map(|(_, count)| *count).max().unwrap_or(1).max(1) as f64;
    let title = format!("Sales Trend of Product Category {category} by Month");

    let root = BitMapBackend::new(output_path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&title, ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(months.len() as f64 - 0.5), 0f64..(max_count * 1.1))?;

    let formatter = |x: &f64| label_at(&months, *x);
    chart
        .configure_mesh()
        .x_labels(months.len().min(24))
        .x_label_formatter(&formatter)
        .x_desc("Month")
        .y_desc("Sales Count")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let points: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .map(|(i, (_, count))| (i as f64, *count as f64))
        .collect();

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
    )?;

    root.present()?;
    info!(path = %output_path.display(), "chart saved");
    Ok(())
}

/// Customers per tier and average spending per tier, as two charts
pub fn create_tier_charts(summary: &[TierSummary], counts_path: &Path, means_path: &Path) -> Result<()> {
    let labels: Vec<String> = summary.iter().map(|tier| tier.tier.label().to_string()).collect();

    let counts: Vec<f64> = summary.iter().map(|tier| tier.count as f64).collect();
    draw_bar_chart(
        counts_path,
        "Customer Distribution Across Spending Tiers",
        ("Spending Tiers", "Number of Customers"),
        &labels,
        &counts,
    )?;

    let means: Vec<f64> = summary.iter().map(|tier| tier.mean).collect();
    draw_bar_chart(
        means_path,
        "Average Spending per Tier",
        ("Spending Tiers", "Average Spending ($)"),
        &labels,
        &means,
    )
}

/// Horizontal bar chart of orders per city
pub fn create_top_cities_chart(cities: &[CityOrders], output_path: &Path) -> Result<()> {
    let names: Vec<String> = cities.iter().map(|city| city.city.clone()).collect();
    let max_orders = cities.iter().map(|city| city.order_count).max().unwrap_or(1).max(1) as f64;

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Top Cities by Orders", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(160)
        .build_cartesian_2d(0f64..(max_orders * 1.1), -0.5f64..(names.len() as f64 - 0.5))?;

    let formatter = |y: &f64| label_at(&names, *y);
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(names.len())
        .y_label_formatter(&formatter)
        .x_desc("Number of Orders")
        .y_desc("City")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(cities.iter().enumerate().map(|(i, city)| {
        Rectangle::new(
            [(0.0, i as f64 - 0.4), (city.order_count as f64, i as f64 + 0.4)],
            BLUE.mix(0.6).filled(),
        )
    }))?;

    root.present()?;
    info!(path = %output_path.display(), "chart saved");
    Ok(())
}

/// Write every dashboard chart and `map_points.csv` into `output_dir`
///
/// Charts whose table is empty or unavailable are skipped. Returns the files written.
pub fn generate_dashboard_charts(report: &DashboardReport, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    if !report.sales.best_sellers.is_empty() {
        let path = output_dir.join("best_sellers_per_year.png");
        create_best_seller_chart(&report.sales.best_sellers, &path)?;
        written.push(path);
    }

    if let Some(category) = &report.selected_category {
        let path = output_dir.join("monthly_trend.png");
        create_monthly_trend_chart(category, &report.selected_series()?, &path)?;
        written.push(path);
    }

    if let Some(spending) = &report.spending {
        let counts_path = output_dir.join("tier_customers.png");
        let means_path = output_dir.join("tier_average_spending.png");
        create_tier_charts(&spending.summary, &counts_path, &means_path)?;
        written.extend([counts_path, means_path]);
    }

    if !report.top_cities.is_empty() {
        let path = output_dir.join("top_cities.png");
        create_top_cities_chart(&report.top_cities, &path)?;
        written.push(path);
    }

    let map_path = output_dir.join("map_points.csv");
    let mut points = map_points(&report.top_locations)?;
    CsvWriter::new(File::create(&map_path)?)
        .include_header(true)
        .finish(&mut points)?;
    written.push(map_path);

    Ok(written)
}

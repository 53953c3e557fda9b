//! Sales Aggregator: best-selling products per year, category trends and
//! the monthly sales view behind the category selector

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::data::{order_timeline, ORDERS, ORDER_ITEMS, PRODUCTS};
use crate::error::AnalyticsError;

/// Items sold for one product in one purchase year
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyProductSales {
    pub product_id: String,
    pub year: i32,
    /// `None` for products listed without a category
    pub category: Option<String>,
    pub sales_count: i64,
}

/// Yearly item counts of one category and their mean year-over-year change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTrend {
    pub category: String,
    /// Zero-filled over every year seen in the data
    pub yearly_sales: BTreeMap<i32, i64>,
    /// `None` when no year-over-year change is defined
    pub trend: Option<f64>,
}

impl CategoryTrend {
    pub fn is_increasing(&self) -> bool {
        self.trend.is_some_and(|trend| trend > 0.0)
    }

    pub fn is_declining(&self) -> bool {
        self.trend.is_some_and(|trend| trend < 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesReport {
    /// One row per year, ascending
    pub best_sellers: Vec<YearlyProductSales>,
    pub increasing: Vec<CategoryTrend>,
    pub declining: Vec<CategoryTrend>,
}

/// Count items sold per (product, purchase year)
///
/// Items join orders and products as inner joins: items of unknown orders
/// or unknown products are excluded. Rows come back ordered by year, then
/// product id.
pub fn product_sales(
    order_items: &DataFrame,
    orders: &DataFrame,
    products: &DataFrame,
) -> crate::Result<Vec<YearlyProductSales>> {
    ORDER_ITEMS.validate(order_items)?;
    ORDERS.validate(orders)?;
    PRODUCTS.validate(products)?;

    let timeline = order_timeline(orders)?;

    let df = item_lines(order_items)
        .join(
            timeline.lazy().select([col("order_id"), col("year")]),
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .group_by([col("product_id"), col("year")])
        .agg([len().cast(DataType::Int64).alias("sales_count")])
        .join(
            product_categories(products),
            [col("product_id")],
            [col("product_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .collect()?;

    debug!(rows = df.height(), "grouped item sales by product and year");

    let product_ids = df.column("product_id")?.str()?;
    let years = df.column("year")?.i32()?;
    let categories = df.column("product_category_name")?.str()?;
    let counts = df.column("sales_count")?.i64()?;

    let mut sales: Vec<YearlyProductSales> = product_ids
        .into_iter()
        .zip(years.into_iter())
        .zip(categories.into_iter())
        .zip(counts.into_iter())
        .filter_map(|(((product_id, year), category), count)| {
            Some(YearlyProductSales {
                product_id: product_id?.to_string(),
                year: year?,
                category: category.map(str::to_string),
                sales_count: count?,
            })
        })
        .collect();

    sales.sort_by(|a, b| {
        a.year
            .cmp(&b.year)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    Ok(sales)
}

/// The single best-selling product of every year
///
/// Ties on `sales_count` go to the lowest `product_id`.
pub fn best_sellers_per_year(sales: &[YearlyProductSales]) -> Vec<YearlyProductSales> {
    let mut best: BTreeMap<i32, &YearlyProductSales> = BTreeMap::new();

    for row in sales {
        best.entry(row.year)
            .and_modify(|current| {
                if row.sales_count > current.sales_count
                    || (row.sales_count == current.sales_count
                        && row.product_id < current.product_id)
                {
                    *current = row;
                }
            })
            .or_insert(row);
    }

    best.into_values().cloned().collect()
}

/// Pivot sales into category x year and compute each category's trend
///
/// Products without a category are left out of the pivot. Categories come
/// back in name order.
pub fn category_trends(sales: &[YearlyProductSales]) -> Vec<CategoryTrend> {
    let mut years = BTreeSet::new();
    let mut pivot: BTreeMap<&str, BTreeMap<i32, i64>> = BTreeMap::new();

    for row in sales {
        if let Some(category) = row.category.as_deref() {
            years.insert(row.year);
            *pivot
                .entry(category)
                .or_default()
                .entry(row.year)
                .or_default() += row.sales_count;
        }
    }

    pivot
        .into_iter()
        .map(|(category, counts)| {
            let yearly_sales: BTreeMap<i32, i64> = years
                .iter()
                .map(|year| (*year, counts.get(year).copied().unwrap_or(0)))
                .collect();
            let series: Vec<i64> = yearly_sales.values().copied().collect();

            CategoryTrend {
                category: category.to_string(),
                trend: mean_yoy_change(&series),
                yearly_sales,
            }
        })
        .collect()
}

/// Mean fractional change between consecutive counts.
/// A transition out of a zero year has no defined change and is skipped.
pub fn mean_yoy_change(counts: &[i64]) -> Option<f64> {
    let changes: Vec<f64> = counts
        .windows(2)
        .filter(|pair| pair[0] != 0)
        .map(|pair| (pair[1] - pair[0]) as f64 / pair[0] as f64)
        .collect();

    if changes.is_empty() {
        None
    } else {
        Some(changes.iter().sum::<f64>() / changes.len() as f64)
    }
}

/// Run the full Sales Aggregator
pub fn analyze_sales(
    order_items: &DataFrame,
    orders: &DataFrame,
    products: &DataFrame,
) -> crate::Result<SalesReport> {
    let sales = product_sales(order_items, orders, products)?;
    let best_sellers = best_sellers_per_year(&sales);

    let (increasing, rest): (Vec<_>, Vec<_>) = category_trends(&sales)
        .into_iter()
        .partition(CategoryTrend::is_increasing);
    let declining: Vec<CategoryTrend> = rest.into_iter().filter(CategoryTrend::is_declining).collect();

    debug!(
        years = best_sellers.len(),
        increasing = increasing.len(),
        declining = declining.len(),
        "sales aggregated"
    );

    Ok(SalesReport {
        best_sellers,
        increasing,
        declining,
    })
}

/// Category x month item counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySales {
    /// Every `YYYY-MM` month with categorized sales, ascending
    pub months: Vec<String>,
    /// Per category, counts aligned with `months` (zero-filled)
    pub counts: BTreeMap<String, Vec<i64>>,
}

impl MonthlySales {
    /// Categories offered for selection, in name order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// Month-by-month counts of the selected category
    pub fn series(&self, category: &str) -> crate::Result<Vec<(String, i64)>> {
        let counts = self
            .counts
            .get(category)
            .ok_or_else(|| AnalyticsError::UnknownCategory(category.to_string()))?;

        Ok(self.months.iter().cloned().zip(counts.iter().copied()).collect())
    }
}

/// Build the monthly sales pivot used by the category trend view
pub fn monthly_sales(
    order_items: &DataFrame,
    orders: &DataFrame,
    products: &DataFrame,
) -> crate::Result<MonthlySales> {
    ORDER_ITEMS.validate(order_items)?;
    ORDERS.validate(orders)?;
    PRODUCTS.validate(products)?;

    let timeline = order_timeline(orders)?;

    let df = item_lines(order_items)
        .join(
            timeline.lazy().select([col("order_id"), col("month")]),
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            product_categories(products),
            [col("product_id")],
            [col("product_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .filter(col("product_category_name").is_not_null())
        .group_by([col("product_category_name"), col("month")])
        .agg([len().cast(DataType::Int64).alias("sales_count")])
        .collect()?;

    let categories = df.column("product_category_name")?.str()?;
    let month_col = df.column("month")?.str()?;
    let counts = df.column("sales_count")?.i64()?;

    let mut cells: BTreeMap<&str, BTreeMap<&str, i64>> = BTreeMap::new();
    let mut months = BTreeSet::new();
    for ((category, month), count) in categories
        .into_iter()
        .zip(month_col.into_iter())
        .zip(counts.into_iter())
    {
        if let (Some(category), Some(month), Some(count)) = (category, month, count) {
            months.insert(month);
            cells.entry(category).or_default().insert(month, count);
        }
    }

    let counts: BTreeMap<String, Vec<i64>> = cells
        .into_iter()
        .map(|(category, by_month)| {
            let row: Vec<i64> = months
                .iter()
                .map(|month| by_month.get(month).copied().unwrap_or(0))
                .collect();
            (category.to_string(), row)
        })
        .collect();

    Ok(MonthlySales {
        months: months.into_iter().map(str::to_string).collect(),
        counts,
    })
}

fn item_lines(order_items: &DataFrame) -> LazyFrame {
    order_items.clone().lazy().select([
        col("order_id").cast(DataType::String),
        col("product_id").cast(DataType::String),
    ])
}

fn product_categories(products: &DataFrame) -> LazyFrame {
    products.clone().lazy().select([
        col("product_id").cast(DataType::String),
        col("product_category_name").cast(DataType::String),
    ])
}

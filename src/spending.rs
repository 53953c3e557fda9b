//! Spending Tier Classifier: per-customer spending split into quantile tiers

use std::collections::BTreeMap;
use std::fmt;

use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::data::{ORDERS, ORDER_ITEMS, PAYMENTS};
use crate::error::AnalyticsError;

/// Quantiles separating Low from Medium and Medium from High
pub const TIER_QUANTILES: (f64, f64) = (0.33, 0.66);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SpendingTier {
    Low,
    Medium,
    High,
}

impl SpendingTier {
    pub const ALL: [SpendingTier; 3] = [SpendingTier::Low, SpendingTier::Medium, SpendingTier::High];

    pub fn label(self) -> &'static str {
        match self {
            SpendingTier::Low => "Low Spenders",
            SpendingTier::Medium => "Medium Spenders",
            SpendingTier::High => "High Spenders",
        }
    }
}

impl fmt::Display for SpendingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cut points derived from the customer population.
/// Bins are right-closed: `Low <= low_max < Medium <= medium_max < High`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierBounds {
    pub low_max: f64,
    pub medium_max: f64,
}

impl TierBounds {
    /// Linear-interpolated quantiles of `total_spending` in `totals`
    pub fn from_totals(totals: &DataFrame) -> crate::Result<Self> {
        let df = totals
            .clone()
            .lazy()
            .select([
                col("total_spending")
                    .quantile(lit(TIER_QUANTILES.0), QuantileMethod::Linear)
                    .alias("low_max"),
                col("total_spending")
                    .quantile(lit(TIER_QUANTILES.1), QuantileMethod::Linear)
                    .alias("medium_max"),
            ])
            .collect()?;

        let bound = |name: &str| -> crate::Result<f64> {
            df.column(name)?.f64()?.get(0).ok_or_else(|| {
                AnalyticsError::DataInsufficient("no spending totals to cut into tiers".to_string())
            })
        };

        Ok(Self {
            low_max: bound("low_max")?,
            medium_max: bound("medium_max")?,
        })
    }

    pub fn tier_for(&self, total: f64) -> SpendingTier {
        if total <= self.low_max {
            SpendingTier::Low
        } else if total <= self.medium_max {
            SpendingTier::Medium
        } else {
            SpendingTier::High
        }
    }

    /// `spending_tier` label column for the `total_spending` column
    pub fn tier_expr(&self) -> Expr {
        when(col("total_spending").lt_eq(lit(self.low_max)))
            .then(lit(SpendingTier::Low.label()))
            .when(col("total_spending").lt_eq(lit(self.medium_max)))
            .then(lit(SpendingTier::Medium.label()))
            .otherwise(lit(SpendingTier::High.label()))
            .alias("spending_tier")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSpending {
    pub customer_id: String,
    pub total_spending: f64,
    pub spending_tier: SpendingTier,
}

/// Summary statistics of `total_spending` within one tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub tier: SpendingTier,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendingReport {
    /// One row per customer, ordered by customer id
    pub customers: Vec<CustomerSpending>,
    /// Low, Medium, High
    pub summary: Vec<TierSummary>,
    pub bounds: TierBounds,
}

/// Total payment value per customer
///
/// Order items only scope the orders that count: an order needs at least
/// one item, and each of its payments is summed once however many items it
/// has. Orders without payments, and payments of unknown orders, drop out.
///
/// # Returns
/// * New frame with `customer_id` and `total_spending`, ordered by customer id
pub fn customer_totals(
    order_items: &DataFrame,
    payments: &DataFrame,
    orders: &DataFrame,
) -> crate::Result<DataFrame> {
    ORDER_ITEMS.validate(order_items)?;
    PAYMENTS.validate(payments)?;
    ORDERS.validate(orders)?;

    let itemized_orders = order_items
        .clone()
        .lazy()
        .select([col("order_id").cast(DataType::String).unique()]);

    let df = payments
        .clone()
        .lazy()
        .select([
            col("order_id").cast(DataType::String),
            col("payment_value").cast(DataType::Float64),
        ])
        .join(
            itemized_orders,
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            orders.clone().lazy().select([
                col("order_id").cast(DataType::String),
                col("customer_id").cast(DataType::String),
            ]),
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .group_by([col("customer_id")])
        .agg([col("payment_value").sum().alias("total_spending")])
        .filter(col("customer_id").is_not_null())
        .sort_by_exprs([col("customer_id")], SortMultipleOptions::default())
        .collect()?;

    debug!(customers = df.height(), "summed payments per customer");
    Ok(df)
}

/// Assign every customer a spending tier and summarize each tier
///
/// # Returns
/// * `SpendingReport` with three non-empty tiers, or
///   `AnalyticsError::DataInsufficient` when the distribution cannot fill
///   all three (always the case with fewer than three distinct totals)
pub fn classify_spending(
    order_items: &DataFrame,
    payments: &DataFrame,
    orders: &DataFrame,
) -> crate::Result<SpendingReport> {
    let totals = customer_totals(order_items, payments, orders)?;
    if totals.height() == 0 {
        return Err(AnalyticsError::DataInsufficient(
            "no customer has a paid order with items".to_string(),
        ));
    }

    let bounds = TierBounds::from_totals(&totals)?;
    let classified = totals.lazy().with_column(bounds.tier_expr()).collect()?;

    let summary_df = classified
        .clone()
        .lazy()
        .group_by([col("spending_tier")])
        .agg([
            col("total_spending").mean().alias("mean"),
            col("total_spending").min().alias("min"),
            col("total_spending").max().alias("max"),
            col("total_spending").sum().alias("sum"),
            len().cast(DataType::Int64).alias("count"),
        ])
        .collect()?;

    let summary = tier_summaries(&summary_df, &classified)?;
    let customers = customer_rows(&classified)?;

    debug!(
        low_max = bounds.low_max,
        medium_max = bounds.medium_max,
        customers = customers.len(),
        "spending tiers assigned"
    );

    Ok(SpendingReport {
        customers,
        summary,
        bounds,
    })
}

fn parse_tier(label: &str) -> Option<SpendingTier> {
    SpendingTier::ALL.into_iter().find(|tier| tier.label() == label)
}

/// Order grouped tier statistics Low, Medium, High; an absent tier is an error
fn tier_summaries(summary_df: &DataFrame, classified: &DataFrame) -> crate::Result<Vec<TierSummary>> {
    let tiers = summary_df.column("spending_tier")?.str()?;
    let means = summary_df.column("mean")?.f64()?;
    let mins = summary_df.column("min")?.f64()?;
    let maxes = summary_df.column("max")?.f64()?;
    let sums = summary_df.column("sum")?.f64()?;
    let counts = summary_df.column("count")?.i64()?;

    let mut by_tier: BTreeMap<SpendingTier, TierSummary> = BTreeMap::new();
    for row in 0..summary_df.height() {
        let Some(tier) = tiers.get(row).and_then(parse_tier) else {
            continue;
        };
        by_tier.insert(
            tier,
            TierSummary {
                tier,
                mean: means.get(row).unwrap_or(0.0),
                min: mins.get(row).unwrap_or(0.0),
                max: maxes.get(row).unwrap_or(0.0),
                sum: sums.get(row).unwrap_or(0.0),
                count: counts.get(row).unwrap_or(0) as usize,
            },
        );
    }

    SpendingTier::ALL
        .into_iter()
        .map(|tier| {
            by_tier.remove(&tier).ok_or_else(|| {
                let distinct = classified
                    .column("total_spending")
                    .and_then(|column| column.n_unique())
                    .unwrap_or(0);
                AnalyticsError::DataInsufficient(format!(
                    "{} distinct spending totals leave the `{}` tier empty",
                    distinct,
                    tier.label()
                ))
            })
        })
        .collect()
}

fn customer_rows(classified: &DataFrame) -> crate::Result<Vec<CustomerSpending>> {
    let customer_ids = classified.column("customer_id")?.str()?;
    let totals = classified.column("total_spending")?.f64()?;
    let tiers = classified.column("spending_tier")?.str()?;

    Ok(customer_ids
        .into_iter()
        .zip(totals.into_iter())
        .zip(tiers.into_iter())
        .filter_map(|((customer_id, total), tier)| {
            Some(CustomerSpending {
                customer_id: customer_id?.to_string(),
                total_spending: total.unwrap_or(0.0),
                spending_tier: parse_tier(tier?)?,
            })
        })
        .collect())
}

//! RFM Calculator: Recency, Frequency and Monetary metrics per person,
//! plus score-based customer segments

use std::fmt;

use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::data::{order_timeline, CUSTOMERS, ORDER_ITEMS, PAYMENTS};

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

/// RFM metrics of one person (`customer_unique_id`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmRecord {
    pub customer_unique_id: String,
    /// Whole days between the latest purchase in the dataset and this person's latest
    pub recency: i64,
    /// Distinct orders placed
    pub frequency: i64,
    /// Sum of payment values over those orders
    pub monetary: f64,
}

/// Compute RFM metrics for every person with a paid, itemized order
///
/// Orders are first reduced to one row each (distinct itemized order ids,
/// summed payments), so Frequency counts distinct orders and Monetary adds every
/// payment exactly once. Recency is measured from the latest purchase across
/// all orders. Records are ordered by `customer_unique_id`.
pub fn compute_rfm(
    orders: &DataFrame,
    order_items: &DataFrame,
    payments: &DataFrame,
    customers: &DataFrame,
) -> crate::Result<Vec<RfmRecord>> {
    ORDER_ITEMS.validate(order_items)?;
    PAYMENTS.validate(payments)?;
    CUSTOMERS.validate(customers)?;

    let timeline = order_timeline(orders)?;
    let Some(latest) = timeline.column("purchased_at")?.i64()?.into_iter().flatten().max() else {
        return Ok(Vec::new());
    };

    let itemized = order_items
        .clone()
        .lazy()
        .select([col("order_id").cast(DataType::String).unique()]);

    let order_values = payments
        .clone()
        .lazy()
        .select([
            col("order_id").cast(DataType::String),
            col("payment_value").cast(DataType::Float64),
        ])
        .group_by([col("order_id")])
        .agg([col("payment_value").sum().alias("order_value")]);

    let df = timeline
        .lazy()
        .select([col("order_id"), col("customer_id"), col("purchased_at")])
        .join(
            itemized,
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            order_values,
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            customers.clone().lazy().select([
                col("customer_id").cast(DataType::String),
                col("customer_unique_id").cast(DataType::String),
            ]),
            [col("customer_id")],
            [col("customer_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .group_by([col("customer_unique_id")])
        .agg([
            col("purchased_at").max().alias("last_purchase"),
            col("order_id").n_unique().cast(DataType::Int64).alias("frequency"),
            col("order_value").sum().alias("monetary"),
        ])
        .collect()?;

    debug!(customers = df.height(), "computed rfm metrics");

    let ids = df.column("customer_unique_id")?.str()?;
    let last_purchases = df.column("last_purchase")?.i64()?;
    let frequencies = df.column("frequency")?.i64()?;
    let monetary = df.column("monetary")?.f64()?;

    let mut records: Vec<RfmRecord> = ids
        .into_iter()
        .zip(last_purchases.into_iter())
        .zip(frequencies.into_iter())
        .zip(monetary.into_iter())
        .filter_map(|(((id, last), frequency), monetary)| {
            Some(RfmRecord {
                customer_unique_id: id?.to_string(),
                recency: (latest - last?).div_euclid(MICROS_PER_DAY),
                frequency: frequency?,
                monetary: monetary.unwrap_or(0.0),
            })
        })
        .collect();

    records.sort_by(|a, b| a.customer_unique_id.cmp(&b.customer_unique_id));
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RfmSegment {
    Champions,
    Loyal,
    New,
    AtRisk,
    Hibernating,
    Promising,
}

impl RfmSegment {
    pub const ALL: [RfmSegment; 6] = [
        RfmSegment::Champions,
        RfmSegment::Loyal,
        RfmSegment::New,
        RfmSegment::AtRisk,
        RfmSegment::Hibernating,
        RfmSegment::Promising,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RfmSegment::Champions => "Champions",
            RfmSegment::Loyal => "Loyal",
            RfmSegment::New => "New",
            RfmSegment::AtRisk => "At Risk",
            RfmSegment::Hibernating => "Hibernating",
            RfmSegment::Promising => "Promising",
        }
    }

    /// Map 1-5 scores to a segment
    pub fn from_scores(r: u8, f: u8, m: u8) -> Self {
        match (r, f, m) {
            (4..=5, 4..=5, _) => RfmSegment::Champions,
            (_, 4..=5, _) => RfmSegment::Loyal,
            (4..=5, _, _) => RfmSegment::New,
            (1..=2, 3..=5, _) | (1..=2, _, 4..=5) => RfmSegment::AtRisk,
            (1..=2, _, _) => RfmSegment::Hibernating,
            _ => RfmSegment::Promising,
        }
    }
}

impl fmt::Display for RfmSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// RFM record with its 1-5 scores (5 is best) and segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCustomer {
    #[serde(flatten)]
    pub record: RfmRecord,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    pub segment: RfmSegment,
}

/// Score every record against the population and assign a segment
///
/// A score is `1 + 5 * share of customers with a strictly worse value`,
/// capped at 5, so equal values always share a score. Lower recency is
/// better.
pub fn segment_customers(records: &[RfmRecord]) -> Vec<ScoredCustomer> {
    let sorted = |values: Vec<f64>| {
        let mut values = values;
        values.sort_by(f64::total_cmp);
        values
    };
    let recency = sorted(records.iter().map(|r| -(r.recency as f64)).collect());
    let frequency = sorted(records.iter().map(|r| r.frequency as f64).collect());
    let monetary = sorted(records.iter().map(|r| r.monetary).collect());

    records
        .iter()
        .map(|record| {
            let r_score = score(&recency, -(record.recency as f64));
            let f_score = score(&frequency, record.frequency as f64);
            let m_score = score(&monetary, record.monetary);
            ScoredCustomer {
                record: record.clone(),
                r_score,
                f_score,
                m_score,
                segment: RfmSegment::from_scores(r_score, f_score, m_score),
            }
        })
        .collect()
}

fn score(sorted: &[f64], value: f64) -> u8 {
    let worse = sorted.partition_point(|other| *other < value);
    (1 + worse * 5 / sorted.len()).min(5) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: RfmSegment,
    pub customers: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Customer counts and mean metrics per segment, in segment order
pub fn segment_summary(scored: &[ScoredCustomer]) -> crate::Result<Vec<SegmentSummary>> {
    let ranks: Vec<u32> = scored
        .iter()
        .map(|customer| customer.segment as u32)
        .collect();
    let recency: Vec<f64> = scored.iter().map(|c| c.record.recency as f64).collect();
    let frequency: Vec<f64> = scored.iter().map(|c| c.record.frequency as f64).collect();
    let monetary: Vec<f64> = scored.iter().map(|c| c.record.monetary).collect();

    let df = df!(
        "segment" => ranks,
        "recency" => recency,
        "frequency" => frequency,
        "monetary" => monetary
    )?
    .lazy()
    .group_by([col("segment")])
    .agg([
        len().cast(DataType::Int64).alias("customers"),
        col("recency").mean().alias("mean_recency"),
        col("frequency").mean().alias("mean_frequency"),
        col("monetary").mean().alias("mean_monetary"),
    ])
    .sort_by_exprs([col("segment")], SortMultipleOptions::default())
    .collect()?;

    let segments = df.column("segment")?.u32()?;
    let customers = df.column("customers")?.i64()?;
    let recencies = df.column("mean_recency")?.f64()?;
    let frequencies = df.column("mean_frequency")?.f64()?;
    let monetaries = df.column("mean_monetary")?.f64()?;

    Ok(segments
        .into_iter()
        .zip(customers.into_iter())
        .zip(recencies.into_iter())
        .zip(frequencies.into_iter())
        .zip(monetaries.into_iter())
        .filter_map(|((((rank, count), recency), frequency), monetary)| {
            Some(SegmentSummary {
                segment: *RfmSegment::ALL.get(rank? as usize)?,
                customers: count? as usize,
                mean_recency: recency?,
                mean_frequency: frequency?,
                mean_monetary: monetary?,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;

    fn create_test_frames() -> (DataFrame, DataFrame, DataFrame, DataFrame) {
        let orders = df!(
            "order_id" => ["O1", "O2", "O3", "O4"],
            "customer_id" => ["C1", "C1b", "C2", "C3"],
            "order_purchase_timestamp" => [
                "2023-01-01 00:00:00",
                "2023-06-01 00:00:00",
                "2023-05-31 12:00:00",
                "2023-03-01 00:00:00"
            ]
        )
        .unwrap();
        // O1 has two items and O2 two payments; O4 has no payment
        let items = df!(
            "order_id" => ["O1", "O1", "O2", "O3", "O4"],
            "product_id" => ["p1", "p2", "p1", "p3", "p1"]
        )
        .unwrap();
        let payments = df!(
            "order_id" => ["O1", "O2", "O2", "O3"],
            "payment_value" => [50.0, 20.0, 10.0, 7.5]
        )
        .unwrap();
        // C1 and C1b are the same person
        let customers = df!(
            "customer_id" => ["C1", "C1b", "C2", "C3"],
            "customer_unique_id" => ["U1", "U1", "U2", "U3"],
            "customer_zip_code_prefix" => ["1000", "1000", "2000", "3000"]
        )
        .unwrap();
        (orders, items, payments, customers)
    }

    #[test]
    fn test_compute_rfm() {
        let (orders, items, payments, customers) = create_test_frames();

        let records = compute_rfm(&orders, &items, &payments, &customers).unwrap();

        assert_eq!(
            records,
            vec![
                RfmRecord {
                    customer_unique_id: "U1".to_string(),
                    recency: 0,
                    frequency: 2,
                    monetary: 80.0,
                },
                RfmRecord {
                    customer_unique_id: "U2".to_string(),
                    recency: 0,
                    frequency: 1,
                    monetary: 7.5,
                },
            ]
        );
    }

    #[test]
    fn test_recency_counts_whole_days() {
        let orders = df!(
            "order_id" => ["O1", "O2"],
            "customer_id" => ["C1", "C2"],
            "order_purchase_timestamp" => ["2023-06-01 00:00:00", "2023-05-29 06:00:00"]
        )
        .unwrap();
        let items = df!("order_id" => ["O1", "O2"], "product_id" => ["p1", "p1"]).unwrap();
        let payments = df!("order_id" => ["O1", "O2"], "payment_value" => [1.0, 2.0]).unwrap();
        let customers = df!(
            "customer_id" => ["C1", "C2"],
            "customer_unique_id" => ["U1", "U2"],
            "customer_zip_code_prefix" => ["1", "2"]
        )
        .unwrap();

        let records = compute_rfm(&orders, &items, &payments, &customers).unwrap();
        // 2 days 18 hours
        assert_eq!(records[1].recency, 2);
    }

    #[test]
    fn test_rfm_is_deterministic() {
        let (orders, items, payments, customers) = create_test_frames();

        let first = compute_rfm(&orders, &items, &payments, &customers).unwrap();
        let second = compute_rfm(&orders, &items, &payments, &customers).unwrap();
        assert_eq!(first, second);
        assert_eq!(segment_customers(&first), segment_customers(&second));
    }

    #[test]
    fn test_missing_unique_id_is_a_schema_error() {
        let (orders, items, payments, _) = create_test_frames();
        let customers = df!("customer_id" => ["C1"], "customer_zip_code_prefix" => ["1"]).unwrap();

        let err = compute_rfm(&orders, &items, &payments, &customers).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Schema { table: "customers", column: "customer_unique_id" }
        ));
    }

    #[test]
    fn test_scores_share_ties() {
        let sorted = [1.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(score(&sorted, 1.0), 1);
        assert_eq!(score(&sorted, 2.0), 3);
        assert_eq!(score(&sorted, 4.0), 5);
    }

    #[test]
    fn test_segments() {
        let records: Vec<RfmRecord> = (0..10)
            .map(|i| RfmRecord {
                customer_unique_id: format!("U{i}"),
                recency: i * 30,
                frequency: 10 - i,
                monetary: (10 - i) as f64 * 100.0,
            })
            .collect();

        let scored = segment_customers(&records);
        assert_eq!(scored[0].segment, RfmSegment::Champions);
        assert_eq!((scored[0].r_score, scored[0].f_score, scored[0].m_score), (5, 5, 5));
        assert_eq!(scored[9].segment, RfmSegment::Hibernating);

        let summary = segment_summary(&scored).unwrap();
        let total: usize = summary.iter().map(|s| s.customers).sum();
        assert_eq!(total, records.len());
        assert!(summary.windows(2).all(|w| w[0].segment < w[1].segment));

        let champions = &summary[0];
        let members: Vec<&ScoredCustomer> = scored
            .iter()
            .filter(|c| c.segment == RfmSegment::Champions)
            .collect();
        assert_eq!(champions.customers, members.len());
        let mean_monetary =
            members.iter().map(|c| c.record.monetary).sum::<f64>() / members.len() as f64;
        assert!((champions.mean_monetary - mean_monetary).abs() < 1e-9);
    }

    #[test]
    fn test_segment_summary_of_nobody_is_empty() {
        assert!(segment_summary(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_segment_mapping() {
        assert_eq!(RfmSegment::from_scores(5, 1, 1), RfmSegment::New);
        assert_eq!(RfmSegment::from_scores(2, 1, 5), RfmSegment::AtRisk);
        assert_eq!(RfmSegment::from_scores(3, 4, 1), RfmSegment::Loyal);
        assert_eq!(RfmSegment::from_scores(3, 2, 2), RfmSegment::Promising);
    }
}

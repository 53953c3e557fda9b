//! Table loading, schema validation and order timeline derivation using Polars

use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::AnalyticsError;

/// Column layout of one input table
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// CSV file name inside the data directory
    pub file: &'static str,
    pub required: &'static [&'static str],
    /// Identifier and key columns, normalized to strings so joins line up
    text: &'static [&'static str],
    float: &'static [&'static str],
}

pub const ORDERS: TableSpec = TableSpec {
    name: "orders",
    file: "orders_dataset.csv",
    required: &["order_id", "customer_id", "order_purchase_timestamp"],
    text: &["order_id", "customer_id", "order_purchase_timestamp"],
    float: &[],
};

pub const ORDER_ITEMS: TableSpec = TableSpec {
    name: "order_items",
    file: "order_items_dataset.csv",
    required: &["order_id", "product_id"],
    text: &["order_id", "product_id"],
    float: &[],
};

pub const PRODUCTS: TableSpec = TableSpec {
    name: "products",
    file: "products_dataset.csv",
    required: &["product_id", "product_category_name"],
    text: &["product_id", "product_category_name"],
    float: &[],
};

pub const PAYMENTS: TableSpec = TableSpec {
    name: "order_payments",
    file: "order_payments_dataset.csv",
    required: &["order_id", "payment_value"],
    text: &["order_id"],
    float: &["payment_value"],
};

pub const CUSTOMERS: TableSpec = TableSpec {
    name: "customers",
    file: "customers_dataset.csv",
    required: &["customer_id", "customer_unique_id", "customer_zip_code_prefix"],
    text: &["customer_id", "customer_unique_id", "customer_zip_code_prefix"],
    float: &[],
};

pub const GEOLOCATION: TableSpec = TableSpec {
    name: "geolocation",
    file: "geolocation_dataset.csv",
    required: &[
        "geolocation_zip_code_prefix",
        "geolocation_city",
        "geolocation_state",
        "geolocation_lat",
        "geolocation_lng",
    ],
    text: &[
        "geolocation_zip_code_prefix",
        "geolocation_city",
        "geolocation_state",
    ],
    float: &["geolocation_lat", "geolocation_lng"],
};

impl TableSpec {
    /// Fail with a schema error on the first required column that is absent
    pub fn validate(&self, df: &DataFrame) -> crate::Result<()> {
        match self
            .required
            .iter()
            .find(|column| df.get_column_index(column).is_none())
        {
            Some(column) => Err(AnalyticsError::Schema {
                table: self.name,
                column: *column,
            }),
            None => Ok(()),
        }
    }

    /// Validate, then cast key columns to strings and amounts to floats.
    /// Returns a new frame; unlisted columns are carried through.
    pub fn normalize(&self, df: DataFrame) -> crate::Result<DataFrame> {
        self.validate(&df)?;

        let casts: Vec<Expr> = self
            .text
            .iter()
            .map(|column| col(*column).cast(DataType::String))
            .chain(
                self.float
                    .iter()
                    .map(|column| col(*column).cast(DataType::Float64)),
            )
            .collect();

        Ok(df.lazy().with_columns(casts).collect()?)
    }
}

/// The six raw tables of the dataset, validated and normalized
#[derive(Debug, Clone)]
pub struct Tables {
    pub orders: DataFrame,
    pub order_items: DataFrame,
    pub products: DataFrame,
    pub payments: DataFrame,
    pub customers: DataFrame,
    pub geolocation: DataFrame,
}

impl Tables {
    /// Build from already-loaded frames, applying the same checks as [`load_tables`]
    pub fn from_frames(
        orders: DataFrame,
        order_items: DataFrame,
        products: DataFrame,
        payments: DataFrame,
        customers: DataFrame,
        geolocation: DataFrame,
    ) -> crate::Result<Self> {
        Ok(Self {
            orders: ORDERS.normalize(orders)?,
            order_items: ORDER_ITEMS.normalize(order_items)?,
            products: PRODUCTS.normalize(products)?,
            payments: PAYMENTS.normalize(payments)?,
            customers: CUSTOMERS.normalize(customers)?,
            geolocation: GEOLOCATION.normalize(geolocation)?,
        })
    }

    /// Row counts per table, in load order
    pub fn row_counts(&self) -> [(&'static str, usize); 6] {
        [
            (ORDERS.name, self.orders.height()),
            (ORDER_ITEMS.name, self.order_items.height()),
            (PRODUCTS.name, self.products.height()),
            (PAYMENTS.name, self.payments.height()),
            (CUSTOMERS.name, self.customers.height()),
            (GEOLOCATION.name, self.geolocation.height()),
        ]
    }
}

/// Load the six dataset CSV files from `dir`
///
/// # Arguments
/// * `dir` - Directory holding `orders_dataset.csv`, `order_items_dataset.csv`,
///   `products_dataset.csv`, `order_payments_dataset.csv`,
///   `customers_dataset.csv` and `geolocation_dataset.csv`
///
/// # Returns
/// * `Tables` whose every frame carries its required columns; a missing
///   column fails here, before any aggregation runs
pub fn load_tables(dir: impl AsRef<Path>) -> crate::Result<Tables> {
    let dir = dir.as_ref();
    let read = |spec: &TableSpec| read_csv(&dir.join(spec.file));

    let tables = Tables::from_frames(
        read(&ORDERS)?,
        read(&ORDER_ITEMS)?,
        read(&PRODUCTS)?,
        read(&PAYMENTS)?,
        read(&CUSTOMERS)?,
        read(&GEOLOCATION)?,
    )?;

    info!(dir = %dir.display(), "dataset loaded");
    Ok(tables)
}

fn read_csv(path: &Path) -> crate::Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    debug!(path = %path.display(), rows = df.height(), "read csv");
    Ok(df)
}

/// Derive the per-order calendar used by the aggregators
///
/// Returns a new frame with `order_id`, `customer_id`, `year` (i32),
/// `month` (`YYYY-MM`) and `purchased_at` (epoch microseconds). Orders with a
/// null id, customer or timestamp are excluded.
pub fn order_timeline(orders: &DataFrame) -> crate::Result<DataFrame> {
    ORDERS.validate(orders)?;

    let order_ids = orders.column("order_id")?.cast(&DataType::String)?;
    let customer_ids = orders.column("customer_id")?.cast(&DataType::String)?;
    let stamps = orders
        .column("order_purchase_timestamp")?
        .cast(&DataType::String)?;

    let capacity = orders.height();
    let mut out_orders = Vec::with_capacity(capacity);
    let mut out_customers = Vec::with_capacity(capacity);
    let mut years = Vec::with_capacity(capacity);
    let mut months = Vec::with_capacity(capacity);
    let mut purchased_at = Vec::with_capacity(capacity);
    let mut skipped = 0usize;

    for ((order_id, customer_id), raw) in order_ids
        .str()?
        .into_iter()
        .zip(customer_ids.str()?.into_iter())
        .zip(stamps.str()?.into_iter())
    {
        let (Some(order_id), Some(customer_id), Some(raw)) = (order_id, customer_id, raw) else {
            skipped += 1;
            continue;
        };

        let purchased =
            parse_purchase_timestamp(raw).ok_or_else(|| AnalyticsError::Timestamp {
                order_id: order_id.to_string(),
                value: raw.to_string(),
            })?;

        out_orders.push(order_id.to_string());
        out_customers.push(customer_id.to_string());
        years.push(purchased.year());
        months.push(purchased.format("%Y-%m").to_string());
        purchased_at.push(purchased.and_utc().timestamp_micros());
    }

    if skipped > 0 {
        warn!(skipped, "orders with a missing id, customer or timestamp excluded");
    }

    Ok(df!(
        "order_id" => out_orders,
        "customer_id" => out_customers,
        "year" => years,
        "month" => months,
        "purchased_at" => purchased_at
    )?)
}

/// Accepts `2017-10-02 10:56:33`, `2017-10-02T10:56:33` or a bare date
pub fn parse_purchase_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

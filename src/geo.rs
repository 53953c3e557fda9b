//! Geo Concentration Finder: locations with the most orders

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::data::{CUSTOMERS, GEOLOCATION, ORDERS};

/// Ranking length used by the dashboard
pub const DEFAULT_TOP_N: usize = 10;

const LOCATION_COLUMNS: [&str; 4] = [
    "geolocation_city",
    "geolocation_state",
    "geolocation_lat",
    "geolocation_lng",
];

/// How geolocation rows attach to a customer's zip prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GeoJoin {
    /// Keep one row per prefix: the smallest (city, state, lat, lng)
    #[default]
    FirstPerPrefix,
    /// Join every row of the prefix, so an order counts once per row
    FanOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoOrderCount {
    pub city: String,
    pub state: String,
    pub lat: f64,
    pub lng: f64,
    pub order_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityOrders {
    pub city: String,
    pub order_count: i64,
}

/// Rank (city, state, lat, lng) locations by number of orders
///
/// # Arguments
/// * `orders`, `geolocation`, `customers` - Raw tables; orders reach a
///   location through customer id, then zip prefix (inner joins, unmatched
///   rows excluded)
/// * `top_n` - Maximum number of locations returned
/// * `policy` - Geolocation de-duplication policy
///
/// # Returns
/// * Locations sorted by `order_count` descending, ties broken by city,
///   state, lat, lng ascending
pub fn top_locations(
    orders: &DataFrame,
    geolocation: &DataFrame,
    customers: &DataFrame,
    top_n: usize,
    policy: GeoJoin,
) -> crate::Result<Vec<GeoOrderCount>> {
    ORDERS.validate(orders)?;
    GEOLOCATION.validate(geolocation)?;
    CUSTOMERS.validate(customers)?;

    let df = orders
        .clone()
        .lazy()
        .select([
            col("order_id").cast(DataType::String),
            col("customer_id").cast(DataType::String),
        ])
        .join(
            customers.clone().lazy().select([
                col("customer_id").cast(DataType::String),
                col("customer_zip_code_prefix").cast(DataType::String),
            ]),
            [col("customer_id")],
            [col("customer_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            prefix_locations(geolocation, policy),
            [col("customer_zip_code_prefix")],
            [col("geolocation_zip_code_prefix")],
            JoinArgs::new(JoinType::Inner),
        )
        .group_by(LOCATION_COLUMNS.map(col))
        .agg([len().cast(DataType::Int64).alias("order_count")])
        .sort_by_exprs(
            [
                col("order_count"),
                col("geolocation_city"),
                col("geolocation_state"),
                col("geolocation_lat"),
                col("geolocation_lng"),
            ],
            SortMultipleOptions::default()
                .with_order_descending_multi([true, false, false, false, false]),
        )
        .limit(IdxSize::try_from(top_n).unwrap_or(IdxSize::MAX))
        .collect()?;

    debug!(locations = df.height(), ?policy, "ranked order locations");

    let cities = df.column("geolocation_city")?.str()?;
    let states = df.column("geolocation_state")?.str()?;
    let lats = df.column("geolocation_lat")?.f64()?;
    let lngs = df.column("geolocation_lng")?.f64()?;
    let counts = df.column("order_count")?.i64()?;

    Ok(cities
        .into_iter()
        .zip(states.into_iter())
        .zip(lats.into_iter())
        .zip(lngs.into_iter())
        .zip(counts.into_iter())
        .filter_map(|((((city, state), lat), lng), count)| {
            Some(GeoOrderCount {
                city: city?.to_string(),
                state: state?.to_string(),
                lat: lat?,
                lng: lng?,
                order_count: count?,
            })
        })
        .collect())
}

/// Geolocation rows keyed by zip prefix, rows with a missing field dropped
fn prefix_locations(geolocation: &DataFrame, policy: GeoJoin) -> LazyFrame {
    let complete = LOCATION_COLUMNS
        .iter()
        .fold(col("geolocation_zip_code_prefix").is_not_null(), |acc, column| {
            acc.and(col(*column).is_not_null())
        });

    let rows = geolocation
        .clone()
        .lazy()
        .select([
            col("geolocation_zip_code_prefix").cast(DataType::String),
            col("geolocation_city").cast(DataType::String),
            col("geolocation_state").cast(DataType::String),
            col("geolocation_lat").cast(DataType::Float64),
            col("geolocation_lng").cast(DataType::Float64),
        ])
        .filter(complete);

    match policy {
        GeoJoin::FanOut => rows,
        GeoJoin::FirstPerPrefix => rows
            .sort_by_exprs(
                [
                    col("geolocation_zip_code_prefix"),
                    col("geolocation_city"),
                    col("geolocation_state"),
                    col("geolocation_lat"),
                    col("geolocation_lng"),
                ],
                SortMultipleOptions::default(),
            )
            .group_by_stable([col("geolocation_zip_code_prefix")])
            .agg(LOCATION_COLUMNS.map(|column| col(column).first())),
    }
}

/// Total orders per city across the ranked locations, largest first
pub fn top_cities(locations: &[GeoOrderCount]) -> Vec<CityOrders> {
    let mut by_city: BTreeMap<&str, i64> = BTreeMap::new();
    for location in locations {
        *by_city.entry(location.city.as_str()).or_default() += location.order_count;
    }

    let mut cities: Vec<CityOrders> = by_city
        .into_iter()
        .map(|(city, order_count)| CityOrders {
            city: city.to_string(),
            order_count,
        })
        .collect();
    cities.sort_by(|a, b| b.order_count.cmp(&a.order_count).then_with(|| a.city.cmp(&b.city)));
    cities
}

/// Coordinates of the ranked locations under the `lat`/`lon` names map widgets expect
pub fn map_points(locations: &[GeoOrderCount]) -> crate::Result<DataFrame> {
    let lat: Vec<f64> = locations.iter().map(|location| location.lat).collect();
    let lon: Vec<f64> = locations.iter().map(|location| location.lng).collect();
    Ok(df!("lat" => lat, "lon" => lon)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_frames() -> (DataFrame, DataFrame, DataFrame) {
        // c1 and c2 live in prefix 1000 (two geolocation rows), c3 in 2000,
        // c4 in an unknown prefix
        let orders = df!(
            "order_id" => ["o1", "o2", "o3", "o4", "o5", "o6"],
            "customer_id" => ["c1", "c1", "c2", "c3", "c3", "c4"],
            "order_purchase_timestamp" => ["2018-01-01 00:00:00"; 6]
        )
        .unwrap();
        let customers = df!(
            "customer_id" => ["c1", "c2", "c3", "c4"],
            "customer_unique_id" => ["u1", "u2", "u3", "u4"],
            "customer_zip_code_prefix" => [1000i64, 1000, 2000, 9999]
        )
        .unwrap();
        let geolocation = df!(
            "geolocation_zip_code_prefix" => [1000i64, 1000, 2000],
            "geolocation_lat" => [-23.55, -23.56, -22.9],
            "geolocation_lng" => [-46.63, -46.64, -43.2],
            "geolocation_city" => ["sao paulo", "sao paulo", "rio de janeiro"],
            "geolocation_state" => ["SP", "SP", "RJ"]
        )
        .unwrap();
        (orders, geolocation, customers)
    }

    #[test]
    fn test_first_per_prefix_counts_each_order_once() {
        let (orders, geolocation, customers) = create_test_frames();

        let top = top_locations(&orders, &geolocation, &customers, DEFAULT_TOP_N, GeoJoin::FirstPerPrefix).unwrap();

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].city, "sao paulo");
        assert_eq!(top[0].order_count, 3);
        assert_eq!(top[0].lat, -23.56);
        assert_eq!(top[1].city, "rio de janeiro");
        assert_eq!(top[1].order_count, 2);
        // unmatched prefix 9999 is excluded, not an error
        let total: i64 = top.iter().map(|l| l.order_count).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_fan_out_multiplies_orders() {
        let (orders, geolocation, customers) = create_test_frames();

        let top = top_locations(&orders, &geolocation, &customers, DEFAULT_TOP_N, GeoJoin::FanOut).unwrap();

        // each of the 3 orders in prefix 1000 matches 2 geolocation rows
        let total: i64 = top.iter().map(|l| l.order_count).sum();
        assert_eq!(total, 3 * 2 + 2);
        assert_eq!(top.len(), 3);
        // ties on count break by city, then state, then coordinates
        assert_eq!(top[0].city, "sao paulo");
        assert_eq!(top[0].lat, -23.56);
        assert_eq!(top[1].city, "sao paulo");
        assert_eq!(top[2].city, "rio de janeiro");
    }

    #[test]
    fn test_ranking_is_sorted_and_bounded() {
        let (orders, geolocation, customers) = create_test_frames();

        let top = top_locations(&orders, &geolocation, &customers, 1, GeoJoin::FirstPerPrefix).unwrap();
        assert_eq!(top.len(), 1);

        let all = top_locations(&orders, &geolocation, &customers, DEFAULT_TOP_N, GeoJoin::FanOut).unwrap();
        assert!(all.len() <= DEFAULT_TOP_N);
        assert!(all.windows(2).all(|w| w[0].order_count >= w[1].order_count));
        assert!(all.iter().all(|l| l.order_count >= 0));
    }

    #[test]
    fn test_oversized_top_n_keeps_every_location() {
        let (orders, geolocation, customers) = create_test_frames();

        let top = top_locations(&orders, &geolocation, &customers, usize::MAX, GeoJoin::FanOut).unwrap();
        assert_eq!(top.len(), 3);
    }

    #[test]
    fn test_top_cities_and_map_points() {
        let (orders, geolocation, customers) = create_test_frames();
        let top = top_locations(&orders, &geolocation, &customers, DEFAULT_TOP_N, GeoJoin::FanOut).unwrap();

        let cities = top_cities(&top);
        assert_eq!(
            cities,
            vec![
                CityOrders { city: "sao paulo".to_string(), order_count: 6 },
                CityOrders { city: "rio de janeiro".to_string(), order_count: 2 },
            ]
        );

        let points = map_points(&top).unwrap();
        assert_eq!(points.get_column_names().len(), 2);
        assert_eq!(points.height(), top.len());
        assert_eq!(points.column("lon").unwrap().f64().unwrap().get(0), Some(top[0].lng));
    }
}

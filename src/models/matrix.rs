use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};

use crate::models::reference::TimeRange;

/// `stage_id -> item_id -> ranges` over which the drop rate is believed
/// stationary, sorted by start time ascending.
pub type MaxAccumulableTimeRanges = HashMap<i64, HashMap<i64, Vec<TimeRange>>>;

/// Distinct per-report quantity -> number of reports observing it.
pub type QuantityBuckets = BTreeMap<i64, i64>;

// ---------------------------------------------------------------------------
// Aggregation rows coming back from ClickHouse.

#[derive(Debug, Clone, Deserialize, Row)]
pub struct TotalQuantityResult {
    pub stage_id: i64,
    pub item_id: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, Deserialize, Row)]
pub struct TotalTimesResult {
    pub stage_id: i64,
    pub total_times: i64,
}

#[derive(Debug, Clone, Deserialize, Row)]
pub struct QuantityUniqCountResult {
    pub stage_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize, Row)]
pub struct PatternQuantityResult {
    pub stage_id: i64,
    pub pattern_id: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, Deserialize, Row)]
pub struct TrendQuantityResult {
    pub group_id: i64,
    pub stage_id: i64,
    pub item_id: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, Deserialize, Row)]
pub struct TrendTimesResult {
    pub group_id: i64,
    pub stage_id: i64,
    pub total_times: i64,
}

// ---------------------------------------------------------------------------
// Drop matrix.

/// Quantity and attempt count for one (stage, item) within one time range,
/// before grouping and zero-fill.
#[derive(Debug, Clone)]
pub struct CombinedResultForDropMatrix {
    pub stage_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub times: i64,
    pub quantity_buckets: QuantityBuckets,
    pub time_range: TimeRange,
}

/// One row of the aggregated matrix, keyed by (server, stage, item, range).
/// `time_range` is populated only for ad-hoc ranges (`range_id == 0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropMatrixElement {
    pub server: String,
    pub stage_id: i64,
    pub item_id: i64,
    pub range_id: i64,
    pub quantity: i64,
    pub times: i64,
    pub quantity_buckets: QuantityBuckets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OneDropMatrixElement {
    pub stage_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub times: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropMatrixQueryResult {
    pub matrix: Vec<OneDropMatrixElement>,
}

// ---------------------------------------------------------------------------
// Pattern matrix.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatrixElement {
    pub server: String,
    pub stage_id: i64,
    pub pattern_id: i64,
    pub range_id: i64,
    pub quantity: i64,
    pub times: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnePatternMatrixElement {
    pub stage_id: i64,
    pub pattern_id: i64,
    pub quantity: i64,
    pub times: i64,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatrixQueryResult {
    pub pattern_matrix: Vec<OnePatternMatrixElement>,
}

// ---------------------------------------------------------------------------
// Trend.

/// Per-item time series over fixed-width buckets. `times[i]` and
/// `quantity[i]` describe bucket `min_group_id + i`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTrend {
    pub item_id: i64,
    pub start_time: DateTime<Utc>,
    pub times: Vec<i64>,
    pub quantity: Vec<i64>,
    #[serde(skip)]
    pub min_group_id: i64,
    #[serde(skip)]
    pub max_group_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTrend {
    pub stage_id: i64,
    pub results: Vec<ItemTrend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendQueryResult {
    pub trends: Vec<StageTrend>,
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::reference::TimeRange;

/// Wire form of a time range: millisecond epochs, with the open-ended
/// sentinel translated to an absent `end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimTimeRange {
    pub start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl From<&TimeRange> for ShimTimeRange {
    fn from(range: &TimeRange) -> Self {
        Self {
            start: range.start_millis(),
            end: if range.is_open_ended() {
                None
            } else {
                Some(range.end_millis())
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimDropMatrixElement {
    pub stage_id: String,
    pub item_id: String,
    pub quantity: i64,
    pub times: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    pub start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimDropMatrixQueryResult {
    pub matrix: Vec<ShimDropMatrixElement>,
}

/// One item of a pattern's composition, in external ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimDropPatternDrop {
    pub item_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimPatternMatrixElement {
    pub stage_id: String,
    pub pattern_id: i64,
    pub drops: Vec<ShimDropPatternDrop>,
    pub quantity: i64,
    pub times: i64,
    pub start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimPatternMatrixQueryResult {
    pub pattern_matrix: Vec<ShimPatternMatrixElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimItemTrend {
    pub start_time: i64,
    pub times: Vec<i64>,
    pub quantity: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimStageTrend {
    /// Keyed by external item id.
    pub results: HashMap<String, ShimItemTrend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimTrendQueryResult {
    /// Keyed by external stage id.
    pub trend: HashMap<String, ShimStageTrend>,
}

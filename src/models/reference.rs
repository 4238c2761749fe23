use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel `end_time` (milliseconds) meaning "open-ended, no end yet".
/// Translated to an absent `end` on the wire.
pub const FAKE_END_TIME_MILLI: i64 = 62_141_368_179_000;

/// Default TTL for every derived cache entry.
pub const CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

pub fn datetime_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// A half-open wall-clock interval `[start_time, end_time)`.
///
/// Persistent ranges carry a positive `range_id`; a `range_id` of 0 marks an
/// ad-hoc range supplied by the caller and carried inline with the element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub range_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TimeRange {
    pub fn customized(start_millis: i64, end_millis: i64) -> Self {
        Self {
            range_id: 0,
            start_time: datetime_from_millis(start_millis),
            end_time: datetime_from_millis(end_millis),
        }
    }

    pub fn start_millis(&self) -> i64 {
        self.start_time.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end_time.timestamp_millis()
    }

    pub fn is_open_ended(&self) -> bool {
        self.end_millis() >= FAKE_END_TIME_MILLI
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at < self.end_time
    }

    /// Half-open interval overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: i64,
    pub ark_item_id: String,
    pub name: String,
    pub sort_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub stage_id: i64,
    pub ark_stage_id: String,
    pub zone_id: i64,
    pub sort_id: i64,
}

/// Declares that `item_id` was droppable from `stage_id` during `range_id`.
///
/// A `None` item means the row describes the stage itself (attempt counting).
/// `accumulable` marks the range as sharing its drop-rate regime with the
/// next-older range for the same (stage, item), which is what allows results
/// across consecutive ranges to be summed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropInfo {
    pub server: String,
    pub stage_id: i64,
    pub item_id: Option<i64>,
    pub range_id: i64,
    pub accumulable: bool,
}

/// One item of a drop pattern's composition. A pattern is the exact multiset
/// of drops a single report can declare; reports reference patterns by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropPatternElement {
    pub pattern_id: i64,
    pub item_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: i64,
    pub public_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(id: i64, start: i64, end: i64) -> TimeRange {
        TimeRange {
            range_id: id,
            start_time: datetime_from_millis(start),
            end_time: datetime_from_millis(end),
        }
    }

    #[test]
    fn overlap_is_half_open() {
        let a = range(1, 1000, 2000);
        let b = range(2, 2000, 3000);
        assert!(!a.overlaps(&b));
        let c = range(3, 1999, 3000);
        assert!(a.overlaps(&c));
    }

    #[test]
    fn open_ended_detection() {
        let r = range(1, 1000, FAKE_END_TIME_MILLI);
        assert!(r.is_open_ended());
        assert!(!range(1, 1000, 2000).is_open_ended());
    }
}

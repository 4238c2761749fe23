//! Aggregation queries over the raw drop-report tables. This is the only
//! module that reads ClickHouse; everything downstream works on the
//! aggregated rows it returns.

use std::collections::HashMap;

use clickhouse::Client;

use crate::error::ServiceError;
use crate::models::matrix::{
    PatternQuantityResult, QuantityUniqCountResult, TotalQuantityResult, TotalTimesResult,
    TrendQuantityResult, TrendTimesResult,
};
use crate::models::reference::TimeRange;

pub struct DropReportService {
    ch: Client,
}

fn escape(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// `created_at` predicate for a half-open range; an open-ended range has no
/// upper bound.
fn time_predicate(range: &TimeRange) -> String {
    let mut predicate = format!(
        "created_at >= fromUnixTimestamp64Milli({})",
        range.start_millis()
    );
    if !range.is_open_ended() {
        predicate.push_str(&format!(
            " AND created_at < fromUnixTimestamp64Milli({})",
            range.end_millis()
        ));
    }
    predicate
}

fn account_predicate(account_id: Option<i64>) -> String {
    match account_id {
        Some(id) => format!(" AND account_id = {id}"),
        None => String::new(),
    }
}

fn stage_item_tuples(stage_items: &HashMap<i64, Vec<i64>>) -> String {
    let mut pairs: Vec<String> = stage_items
        .iter()
        .flat_map(|(stage_id, item_ids)| {
            item_ids
                .iter()
                .map(move |item_id| format!("({stage_id}, {item_id})"))
        })
        .collect();
    pairs.sort();
    pairs.join(", ")
}

fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl DropReportService {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }

    /// Total dropped quantity per (stage, item) within one time range.
    pub async fn calc_total_quantity_for_drop_matrix(
        &self,
        server: &str,
        range: &TimeRange,
        stage_items: &HashMap<i64, Vec<i64>>,
        account_id: Option<i64>,
    ) -> Result<Vec<TotalQuantityResult>, ServiceError> {
        if stage_items.values().all(Vec::is_empty) {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT stage_id, item_id, toInt64(sum(quantity)) AS total_quantity \
             FROM drop_report_drops \
             WHERE server = '{}' AND reliable = 1 AND {} \
             AND (stage_id, item_id) IN ({}){} \
             GROUP BY stage_id, item_id",
            escape(server),
            time_predicate(range),
            stage_item_tuples(stage_items),
            account_predicate(account_id),
        );
        Ok(self.ch.query(&sql).fetch_all::<TotalQuantityResult>().await?)
    }

    /// Total stage attempts per stage within one time range.
    pub async fn calc_total_times_for_drop_matrix(
        &self,
        server: &str,
        range: &TimeRange,
        stage_ids: &[i64],
        account_id: Option<i64>,
    ) -> Result<Vec<TotalTimesResult>, ServiceError> {
        if stage_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT stage_id, toInt64(sum(times)) AS total_times \
             FROM drop_reports \
             WHERE server = '{}' AND reliable = 1 AND {} \
             AND stage_id IN ({}){} \
             GROUP BY stage_id",
            escape(server),
            time_predicate(range),
            id_list(stage_ids),
            account_predicate(account_id),
        );
        Ok(self.ch.query(&sql).fetch_all::<TotalTimesResult>().await?)
    }

    /// Number of reports per distinct dropped quantity, per (stage, item).
    /// Feeds the per-attempt standard deviation.
    pub async fn calc_quantity_uniq_count_for_drop_matrix(
        &self,
        server: &str,
        range: &TimeRange,
        stage_items: &HashMap<i64, Vec<i64>>,
        account_id: Option<i64>,
    ) -> Result<Vec<QuantityUniqCountResult>, ServiceError> {
        if stage_items.values().all(Vec::is_empty) {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT stage_id, item_id, quantity, toInt64(count()) AS count \
             FROM drop_report_drops \
             WHERE server = '{}' AND reliable = 1 AND {} \
             AND (stage_id, item_id) IN ({}){} \
             GROUP BY stage_id, item_id, quantity",
            escape(server),
            time_predicate(range),
            stage_item_tuples(stage_items),
            account_predicate(account_id),
        );
        Ok(self
            .ch
            .query(&sql)
            .fetch_all::<QuantityUniqCountResult>()
            .await?)
    }

    /// Total reported quantity per (stage, drop pattern) within one range.
    pub async fn calc_total_quantity_for_pattern_matrix(
        &self,
        server: &str,
        range: &TimeRange,
        stage_ids: &[i64],
        account_id: Option<i64>,
    ) -> Result<Vec<PatternQuantityResult>, ServiceError> {
        if stage_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT stage_id, pattern_id, toInt64(sum(times)) AS total_quantity \
             FROM drop_reports \
             WHERE server = '{}' AND reliable = 1 AND {} \
             AND stage_id IN ({}){} \
             GROUP BY stage_id, pattern_id",
            escape(server),
            time_predicate(range),
            id_list(stage_ids),
            account_predicate(account_id),
        );
        Ok(self
            .ch
            .query(&sql)
            .fetch_all::<PatternQuantityResult>()
            .await?)
    }

    /// Dropped quantity per (interval bucket, stage, item). `group_id` is the
    /// absolute bucket index `floor(epoch_seconds / interval_secs)`.
    pub async fn calc_quantity_for_trend(
        &self,
        server: &str,
        range: &TimeRange,
        interval_secs: i64,
        stage_ids: &[i64],
    ) -> Result<Vec<TrendQuantityResult>, ServiceError> {
        if stage_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT toInt64(intDiv(toUnixTimestamp(created_at), {interval_secs})) AS group_id, \
             stage_id, item_id, toInt64(sum(quantity)) AS total_quantity \
             FROM drop_report_drops \
             WHERE server = '{}' AND reliable = 1 AND {} \
             AND stage_id IN ({}) \
             GROUP BY group_id, stage_id, item_id",
            escape(server),
            time_predicate(range),
            id_list(stage_ids),
        );
        Ok(self.ch.query(&sql).fetch_all::<TrendQuantityResult>().await?)
    }

    /// Stage attempts per (interval bucket, stage); see
    /// [`Self::calc_quantity_for_trend`] for the bucket index.
    pub async fn calc_times_for_trend(
        &self,
        server: &str,
        range: &TimeRange,
        interval_secs: i64,
        stage_ids: &[i64],
    ) -> Result<Vec<TrendTimesResult>, ServiceError> {
        if stage_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT toInt64(intDiv(toUnixTimestamp(created_at), {interval_secs})) AS group_id, \
             stage_id, toInt64(sum(times)) AS total_times \
             FROM drop_reports \
             WHERE server = '{}' AND reliable = 1 AND {} \
             AND stage_id IN ({}) \
             GROUP BY group_id, stage_id",
            escape(server),
            time_predicate(range),
            id_list(stage_ids),
        );
        Ok(self.ch.query(&sql).fetch_all::<TrendTimesResult>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reference::{FAKE_END_TIME_MILLI, TimeRange};

    #[test]
    fn open_ended_range_has_no_upper_bound() {
        let range = TimeRange::customized(1000, FAKE_END_TIME_MILLI);
        let predicate = time_predicate(&range);
        assert!(predicate.contains("created_at >= fromUnixTimestamp64Milli(1000)"));
        assert!(!predicate.contains("created_at <"));

        let closed = TimeRange::customized(1000, 2000);
        assert!(time_predicate(&closed).contains("created_at < fromUnixTimestamp64Milli(2000)"));
    }

    #[test]
    fn stage_item_tuples_are_stable() {
        let stage_items = HashMap::from([(1, vec![10, 11]), (2, vec![20])]);
        assert_eq!(stage_item_tuples(&stage_items), "(1, 10), (1, 11), (2, 20)");
    }
}

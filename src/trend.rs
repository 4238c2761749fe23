//! Per-(stage, item) drop time series over fixed-width interval buckets.
//! Bucket ids are absolute (`floor(epoch_seconds / interval)`), so series
//! from different stages share a time base.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::caches::Caches;
use crate::drop_report::DropReportService;
use crate::error::ServiceError;
use crate::models::matrix::{
    ItemTrend, StageTrend, TrendQuantityResult, TrendQueryResult, TrendTimesResult,
};
use crate::models::reference::{CACHE_TTL, TimeRange, datetime_from_millis};
use crate::models::shim::ShimTrendQueryResult;
use crate::shim::ShimService;
use crate::time_range::TimeRangeService;

const DEFAULT_INTERVAL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_SPAN_DAYS: i64 = 60;

pub fn trend_last_modified_tag(server: &str) -> String {
    format!("[trend#server|{server}]")
}

pub struct TrendService {
    time_range: Arc<TimeRangeService>,
    drop_report: Arc<DropReportService>,
    caches: Arc<Caches>,
    shim: Arc<ShimService>,
}

impl TrendService {
    pub fn new(
        time_range: Arc<TimeRangeService>,
        drop_report: Arc<DropReportService>,
        caches: Arc<Caches>,
        shim: Arc<ShimService>,
    ) -> Self {
        Self {
            time_range,
            drop_report,
            caches,
            shim,
        }
    }

    pub async fn get_shim_saved_trend_results(
        &self,
        server: &str,
    ) -> Result<ShimTrendQueryResult, ServiceError> {
        let (result, recomputed) = self
            .caches
            .shim_saved_trend_results
            .get_or_compute(server, CACHE_TTL, || async {
                self.calc_shim_trend(server).await
            })
            .await?;
        if recomputed {
            self.caches.stamp_last_modified(&trend_last_modified_tag(server));
        }
        Ok(result)
    }

    /// Recomputes the series and overwrites the cached result. Trends are
    /// cache-only; nothing is persisted.
    pub async fn refresh_saved_trend_results(&self, server: &str) -> Result<(), ServiceError> {
        let result = self.calc_shim_trend(server).await?;
        self.caches
            .shim_saved_trend_results
            .set(server, result, CACHE_TTL);
        self.caches.stamp_last_modified(&trend_last_modified_tag(server));
        Ok(())
    }

    async fn calc_shim_trend(&self, server: &str) -> Result<ShimTrendQueryResult, ServiceError> {
        let latest_ranges = self
            .time_range
            .get_latest_time_ranges_by_server(server)
            .await?;
        let mut stage_ids: Vec<i64> = latest_ranges.keys().copied().collect();
        stage_ids.sort_unstable();

        let interval_secs = self.property_i64("trend_interval_secs", DEFAULT_INTERVAL_SECS);
        let span_days = self.property_i64("trend_span_days", DEFAULT_SPAN_DAYS);

        let now = Utc::now();
        let span = TimeRange {
            range_id: 0,
            start_time: now - Duration::days(span_days),
            end_time: now,
        };

        let quantities = self
            .drop_report
            .calc_quantity_for_trend(server, &span, interval_secs, &stage_ids)
            .await?;
        let times = self
            .drop_report
            .calc_times_for_trend(server, &span, interval_secs, &stage_ids)
            .await?;

        let result = build_trend_result(&quantities, &times, interval_secs);
        self.shim.apply_shim_for_trend_query(result).await
    }

    fn property_i64(&self, key: &str, default: i64) -> i64 {
        self.caches
            .property(key)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default)
    }
}

/// Merge the quantity and attempt streams into dense per-(stage, item)
/// series covering each item's observed `[min_group_id, max_group_id]`,
/// zero-filling buckets without reports.
fn build_trend_result(
    quantities: &[TrendQuantityResult],
    times: &[TrendTimesResult],
    interval_secs: i64,
) -> TrendQueryResult {
    // stage -> item -> bucket -> quantity
    let mut quantity_map: HashMap<i64, HashMap<i64, HashMap<i64, i64>>> = HashMap::new();
    for row in quantities {
        quantity_map
            .entry(row.stage_id)
            .or_default()
            .entry(row.item_id)
            .or_default()
            .insert(row.group_id, row.total_quantity);
    }
    // stage -> bucket -> times
    let mut times_map: HashMap<i64, HashMap<i64, i64>> = HashMap::new();
    for row in times {
        times_map
            .entry(row.stage_id)
            .or_default()
            .insert(row.group_id, row.total_times);
    }

    let mut trends = Vec::new();
    for (stage_id, items) in quantity_map {
        let stage_times = times_map.get(&stage_id);
        let mut results = Vec::new();
        for (item_id, buckets) in items {
            let (Some(&min_group_id), Some(&max_group_id)) =
                (buckets.keys().min(), buckets.keys().max())
            else {
                continue;
            };
            let len = (max_group_id - min_group_id + 1) as usize;

            let mut quantity = vec![0; len];
            let mut item_times = vec![0; len];
            for offset in 0..len {
                let group_id = min_group_id + offset as i64;
                quantity[offset] = buckets.get(&group_id).copied().unwrap_or(0);
                item_times[offset] = stage_times
                    .and_then(|buckets| buckets.get(&group_id))
                    .copied()
                    .unwrap_or(0);
            }

            results.push(ItemTrend {
                item_id,
                start_time: datetime_from_millis(min_group_id * interval_secs * 1000),
                times: item_times,
                quantity,
                min_group_id,
                max_group_id,
            });
        }
        results.sort_by_key(|item_trend| item_trend.item_id);
        trends.push(StageTrend { stage_id, results });
    }
    trends.sort_by_key(|stage_trend| stage_trend.stage_id);
    TrendQueryResult { trends }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantity(stage: i64, item: i64, group: i64, total: i64) -> TrendQuantityResult {
        TrendQuantityResult {
            group_id: group,
            stage_id: stage,
            item_id: item,
            total_quantity: total,
        }
    }

    fn times(stage: i64, group: i64, total: i64) -> TrendTimesResult {
        TrendTimesResult {
            group_id: group,
            stage_id: stage,
            total_times: total,
        }
    }

    #[test]
    fn series_are_dense_and_zero_filled() {
        let quantities = vec![
            quantity(1, 10, 100, 5),
            quantity(1, 10, 102, 7),
        ];
        let attempt_rows = vec![times(1, 100, 50), times(1, 101, 40), times(1, 102, 60)];

        let result = build_trend_result(&quantities, &attempt_rows, 86400);
        assert_eq!(result.trends.len(), 1);
        let item_trend = &result.trends[0].results[0];
        assert_eq!(item_trend.min_group_id, 100);
        assert_eq!(item_trend.max_group_id, 102);
        assert_eq!(item_trend.quantity, vec![5, 0, 7]);
        assert_eq!(item_trend.times, vec![50, 40, 60]);
        assert_eq!(
            item_trend.start_time.timestamp_millis(),
            100 * 86400 * 1000
        );
    }

    #[test]
    fn stages_and_items_are_sorted() {
        let quantities = vec![
            quantity(2, 20, 100, 1),
            quantity(1, 11, 100, 1),
            quantity(1, 10, 100, 1),
        ];
        let attempt_rows = vec![times(1, 100, 5), times(2, 100, 5)];

        let result = build_trend_result(&quantities, &attempt_rows, 86400);
        let stage_ids: Vec<i64> = result.trends.iter().map(|t| t.stage_id).collect();
        assert_eq!(stage_ids, vec![1, 2]);
        let item_ids: Vec<i64> = result.trends[0].results.iter().map(|r| r.item_id).collect();
        assert_eq!(item_ids, vec![10, 11]);
    }
}

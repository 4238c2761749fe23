//! The pattern-matrix engine: same skeleton as the drop matrix, but grouped
//! by (stage, drop pattern) over each stage's latest range. Patterns are
//! enumerated from the reports themselves, so there is no zero-fill.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::caches::Caches;
use crate::drop_report::DropReportService;
use crate::error::ServiceError;
use crate::models::matrix::{
    OnePatternMatrixElement, PatternMatrixElement, PatternMatrixQueryResult,
    PatternQuantityResult, TotalTimesResult,
};
use crate::models::reference::{CACHE_TTL, TimeRange};
use crate::models::shim::ShimPatternMatrixQueryResult;
use crate::ref_db::RefDb;
use crate::shim::ShimService;
use crate::time_range::TimeRangeService;

pub fn pattern_matrix_last_modified_tag(server: &str) -> String {
    format!("[patternMatrix#server|{server}]")
}

pub struct PatternMatrixService {
    time_range: Arc<TimeRangeService>,
    drop_report: Arc<DropReportService>,
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
    shim: Arc<ShimService>,
}

impl PatternMatrixService {
    pub fn new(
        time_range: Arc<TimeRangeService>,
        drop_report: Arc<DropReportService>,
        ref_db: Arc<RefDb>,
        caches: Arc<Caches>,
        shim: Arc<ShimService>,
    ) -> Self {
        Self {
            time_range,
            drop_report,
            ref_db,
            caches,
            shim,
        }
    }

    /// Pattern totals over each stage's latest range, in API shape. Cached
    /// per server for the global call; personal reads recompute live.
    pub async fn get_shim_latest_pattern_matrix_results(
        &self,
        server: &str,
        account_id: Option<i64>,
    ) -> Result<ShimPatternMatrixQueryResult, ServiceError> {
        if account_id.is_some() {
            let elements = self.calc_for_latest_ranges(server, account_id).await?;
            let result = self.convert_to_query_result(&elements).await?;
            return self.shim.apply_shim_for_pattern_matrix_query(result).await;
        }

        let (result, recomputed) = self
            .caches
            .shim_latest_pattern_matrix_results
            .get_or_compute(server, CACHE_TTL, || async {
                let elements = self.ref_db.get_pattern_matrix_elements_by_server(server)?;
                let result = self.convert_to_query_result(&elements).await?;
                self.shim.apply_shim_for_pattern_matrix_query(result).await
            })
            .await?;
        if recomputed {
            self.caches
                .stamp_last_modified(&pattern_matrix_last_modified_tag(server));
        }
        Ok(result)
    }

    /// Recomputes and atomically replaces the persisted pattern elements of
    /// `server`, then drops the cached API result.
    pub async fn refresh_all_pattern_matrix_elements(
        self: &Arc<Self>,
        server: &str,
    ) -> Result<(), ServiceError> {
        let latest_ranges = self
            .time_range
            .get_latest_time_ranges_by_server(server)
            .await?;
        let stages_by_range = group_stages_by_range(&latest_ranges);

        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(15);
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let mut tasks = tokio::task::JoinSet::new();
        for (range, stage_ids) in stages_by_range {
            let service = Arc::clone(self);
            let server = server.to_string();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ServiceError::Task(e.to_string()))?;
                service
                    .calc_for_one_range(&server, &range, &stage_ids, None)
                    .await
            });
        }

        let mut to_save = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(batch)) => to_save.extend(batch),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(ServiceError::Task(e.to_string())),
            }
        }

        tracing::info!(
            "pattern matrix refresh for {server}: {} elements",
            to_save.len()
        );
        self.ref_db.replace_pattern_matrix_elements(server, &to_save)?;
        self.caches.shim_latest_pattern_matrix_results.delete(server);
        Ok(())
    }

    async fn calc_for_latest_ranges(
        &self,
        server: &str,
        account_id: Option<i64>,
    ) -> Result<Vec<PatternMatrixElement>, ServiceError> {
        let latest_ranges = self
            .time_range
            .get_latest_time_ranges_by_server(server)
            .await?;
        let mut elements = Vec::new();
        for (range, stage_ids) in group_stages_by_range(&latest_ranges) {
            elements.extend(
                self.calc_for_one_range(server, &range, &stage_ids, account_id)
                    .await?,
            );
        }
        Ok(elements)
    }

    async fn calc_for_one_range(
        &self,
        server: &str,
        range: &TimeRange,
        stage_ids: &[i64],
        account_id: Option<i64>,
    ) -> Result<Vec<PatternMatrixElement>, ServiceError> {
        let quantities = self
            .drop_report
            .calc_total_quantity_for_pattern_matrix(server, range, stage_ids, account_id)
            .await?;
        let times = self
            .drop_report
            .calc_total_times_for_drop_matrix(server, range, stage_ids, account_id)
            .await?;
        Ok(combine_pattern_quantity_and_times(
            server,
            &quantities,
            &times,
            range.range_id,
        ))
    }

    async fn convert_to_query_result(
        &self,
        elements: &[PatternMatrixElement],
    ) -> Result<PatternMatrixQueryResult, ServiceError> {
        let mut pattern_matrix = Vec::new();
        let mut ranges_by_id: HashMap<i64, TimeRange> = HashMap::new();
        for element in elements {
            let time_range = match ranges_by_id.get(&element.range_id) {
                Some(range) => range.clone(),
                None => {
                    let range = self.time_range.get_time_range_by_id(element.range_id).await?;
                    ranges_by_id.insert(element.range_id, range.clone());
                    range
                }
            };
            pattern_matrix.push(OnePatternMatrixElement {
                stage_id: element.stage_id,
                pattern_id: element.pattern_id,
                quantity: element.quantity,
                times: element.times,
                time_range,
            });
        }
        Ok(PatternMatrixQueryResult { pattern_matrix })
    }
}

/// Stages sharing the same latest range are aggregated together in one query.
fn group_stages_by_range(latest_ranges: &HashMap<i64, TimeRange>) -> Vec<(TimeRange, Vec<i64>)> {
    let mut by_range: HashMap<i64, (TimeRange, Vec<i64>)> = HashMap::new();
    for (&stage_id, range) in latest_ranges {
        by_range
            .entry(range.range_id)
            .or_insert_with(|| (range.clone(), Vec::new()))
            .1
            .push(stage_id);
    }
    let mut groups: Vec<(TimeRange, Vec<i64>)> = by_range.into_values().collect();
    for (_, stage_ids) in &mut groups {
        stage_ids.sort_unstable();
    }
    groups.sort_by_key(|(range, _)| range.range_id);
    groups
}

fn combine_pattern_quantity_and_times(
    server: &str,
    quantities: &[PatternQuantityResult],
    times: &[TotalTimesResult],
    range_id: i64,
) -> Vec<PatternMatrixElement> {
    let mut quantity_map: HashMap<i64, Vec<(i64, i64)>> = HashMap::new();
    for quantity in quantities {
        quantity_map
            .entry(quantity.stage_id)
            .or_default()
            .push((quantity.pattern_id, quantity.total_quantity));
    }

    let mut elements = Vec::new();
    for times_result in times {
        let Some(patterns) = quantity_map.get(&times_result.stage_id) else {
            continue;
        };
        for &(pattern_id, quantity) in patterns {
            elements.push(PatternMatrixElement {
                server: server.to_string(),
                stage_id: times_result.stage_id,
                pattern_id,
                range_id,
                quantity,
                times: times_result.total_times,
            });
        }
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reference::datetime_from_millis;

    #[test]
    fn combine_pairs_patterns_with_stage_times() {
        let quantities = vec![
            PatternQuantityResult {
                stage_id: 1,
                pattern_id: 100,
                total_quantity: 6,
            },
            PatternQuantityResult {
                stage_id: 1,
                pattern_id: 101,
                total_quantity: 4,
            },
            PatternQuantityResult {
                stage_id: 2,
                pattern_id: 100,
                total_quantity: 9,
            },
        ];
        let times = vec![TotalTimesResult {
            stage_id: 1,
            total_times: 10,
        }];

        let mut elements = combine_pattern_quantity_and_times("CN", &quantities, &times, 3);
        elements.sort_by_key(|el| el.pattern_id);

        // stage 2 has no attempt row and emits nothing
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|el| el.stage_id == 1 && el.times == 10));
        assert_eq!(elements[0].pattern_id, 100);
        assert_eq!(elements[0].quantity, 6);
        assert_eq!(elements[1].pattern_id, 101);
        assert_eq!(elements[1].quantity, 4);
        assert!(elements.iter().all(|el| el.range_id == 3));
    }

    #[test]
    fn stages_sharing_a_range_query_together() {
        let range = |id: i64, start: i64| TimeRange {
            range_id: id,
            start_time: datetime_from_millis(start),
            end_time: datetime_from_millis(start + 1000),
        };
        let latest = HashMap::from([(1, range(7, 0)), (2, range(7, 0)), (3, range(8, 5000))]);

        let groups = group_stages_by_range(&latest);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.range_id, 7);
        assert_eq!(groups[0].1, vec![1, 2]);
        assert_eq!(groups[1].1, vec![3]);
    }
}

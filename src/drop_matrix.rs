//! The drop-matrix engine: per-range aggregation, grouping and zero-fill,
//! max-accumulable combination, projections, and the bulk refresh pipeline.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Semaphore, mpsc};

use crate::caches::Caches;
use crate::drop_info::{
    DropInfoService, stage_ids_from_drop_infos, stage_item_map_from_drop_infos,
};
use crate::drop_report::DropReportService;
use crate::error::ServiceError;
use crate::models::matrix::{
    CombinedResultForDropMatrix, DropMatrixElement, DropMatrixQueryResult, OneDropMatrixElement,
    QuantityBuckets, QuantityUniqCountResult, TotalQuantityResult, TotalTimesResult,
};
use crate::models::reference::{CACHE_TTL, TimeRange};
use crate::models::shim::ShimDropMatrixQueryResult;
use crate::ref_db::RefDb;
use crate::shim::ShimService;
use crate::time_range::TimeRangeService;

/// Tag under which the cached global matrix records its recompute time.
pub fn matrix_last_modified_tag(server: &str) -> String {
    format!("[dropMatrix#server|{server}]")
}

fn optional_filter(ids: &[i64]) -> Option<&[i64]> {
    if ids.is_empty() { None } else { Some(ids) }
}

pub struct DropMatrixService {
    time_range: Arc<TimeRangeService>,
    drop_info: Arc<DropInfoService>,
    drop_report: Arc<DropReportService>,
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
    shim: Arc<ShimService>,
}

impl DropMatrixService {
    pub fn new(
        time_range: Arc<TimeRangeService>,
        drop_info: Arc<DropInfoService>,
        drop_report: Arc<DropReportService>,
        ref_db: Arc<RefDb>,
        caches: Arc<Caches>,
        shim: Arc<ShimService>,
    ) -> Self {
        Self {
            time_range,
            drop_info,
            drop_report,
            ref_db,
            caches,
            shim,
        }
    }

    /// The max-accumulable matrix in API shape. Cached per
    /// `server|showClosed` only for the global, unfiltered call.
    pub async fn get_shim_max_accumulable_drop_matrix_results(
        &self,
        server: &str,
        show_closed: bool,
        stage_filter: &str,
        item_filter: &str,
        account_id: Option<i64>,
    ) -> Result<ShimDropMatrixQueryResult, ServiceError> {
        let cacheable = account_id.is_none() && stage_filter.is_empty() && item_filter.is_empty();
        if !cacheable {
            return self
                .calc_shim_max_accumulable(server, show_closed, stage_filter, item_filter, account_id)
                .await;
        }

        let key = format!("{server}|{show_closed}");
        let (result, recomputed) = self
            .caches
            .shim_max_accumulable_drop_matrix_results
            .get_or_compute(&key, CACHE_TTL, || async {
                self.calc_shim_max_accumulable(server, show_closed, "", "", None)
                    .await
            })
            .await?;
        if recomputed {
            self.caches.stamp_last_modified(&matrix_last_modified_tag(server));
        }
        Ok(result)
    }

    /// Matrix over one caller-supplied ad-hoc range. Never cached.
    pub async fn get_shim_customized_drop_matrix_results(
        &self,
        server: &str,
        range: &TimeRange,
        stage_ids: &[i64],
        item_ids: &[i64],
        account_id: Option<i64>,
    ) -> Result<ShimDropMatrixQueryResult, ServiceError> {
        let result = self
            .query_drop_matrix(server, std::slice::from_ref(range), stage_ids, item_ids, account_id)
            .await?;
        self.shim
            .apply_shim_for_drop_matrix_query(server, true, "", "", result)
            .await
    }

    /// The internal query result without API-shape projection.
    pub async fn query_drop_matrix(
        &self,
        server: &str,
        time_ranges: &[TimeRange],
        stage_ids: &[i64],
        item_ids: &[i64],
        account_id: Option<i64>,
    ) -> Result<DropMatrixQueryResult, ServiceError> {
        let elements = self
            .calc_drop_matrix_for_time_ranges(
                server,
                time_ranges,
                optional_filter(stage_ids),
                optional_filter(item_ids),
                account_id,
            )
            .await?;
        self.convert_to_drop_matrix_query_result(&elements).await
    }

    /// Recomputes every (stage, item, range) element of `server` from raw
    /// reports and atomically replaces the persisted set. One bounded task
    /// per range; the first failure aborts the whole refresh and leaves the
    /// previous elements in place.
    pub async fn refresh_all_drop_matrix_elements(
        self: &Arc<Self>,
        server: &str,
    ) -> Result<(), ServiceError> {
        let time_ranges = self.time_range.get_time_ranges_by_server(server).await?;

        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(15);
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let (tx, mut rx) = mpsc::channel::<Vec<DropMatrixElement>>(15);

        let mut tasks = tokio::task::JoinSet::new();
        for range in time_ranges {
            let service = Arc::clone(self);
            let server = server.to_string();
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ServiceError::Task(e.to_string()))?;
                let started = Instant::now();
                let batch = service
                    .calc_drop_matrix_for_time_ranges(
                        &server,
                        std::slice::from_ref(&range),
                        None,
                        None,
                        None,
                    )
                    .await?;
                tx.send(batch).await.ok();
                Ok::<_, ServiceError>((range.range_id, started.elapsed().as_millis()))
            });
        }
        // The collector drains until every producer clone of `tx` is gone.
        drop(tx);

        let collector = tokio::spawn(async move {
            let mut all = Vec::new();
            while let Some(batch) = rx.recv().await {
                all.extend(batch);
            }
            all
        });

        let mut used_time: HashMap<i64, u128> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((range_id, elapsed_ms))) => {
                    used_time.insert(range_id, elapsed_ms);
                }
                Ok(Err(e)) => {
                    collector.abort();
                    return Err(e);
                }
                Err(e) => {
                    collector.abort();
                    return Err(ServiceError::Task(e.to_string()));
                }
            }
        }

        let to_save = collector
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))?;
        tracing::info!(
            "drop matrix refresh for {server}: {} elements across {} ranges",
            to_save.len(),
            used_time.len()
        );
        for (range_id, elapsed_ms) in &used_time {
            tracing::debug!("range {range_id} recomputed in {elapsed_ms}ms");
        }

        self.ref_db.replace_drop_matrix_elements(server, &to_save)?;
        self.caches
            .shim_max_accumulable_drop_matrix_results
            .delete(&format!("{server}|true"));
        self.caches
            .shim_max_accumulable_drop_matrix_results
            .delete(&format!("{server}|false"));
        Ok(())
    }

    async fn calc_shim_max_accumulable(
        &self,
        server: &str,
        show_closed: bool,
        stage_filter: &str,
        item_filter: &str,
        account_id: Option<i64>,
    ) -> Result<ShimDropMatrixQueryResult, ServiceError> {
        let elements = self.get_drop_matrix_elements(server, account_id).await?;
        let result = self
            .convert_to_max_accumulable_result(server, &elements)
            .await?;
        self.shim
            .apply_shim_for_drop_matrix_query(server, show_closed, stage_filter, item_filter, result)
            .await
    }

    /// Global reads come from the persisted elements; personal reads are
    /// recomputed live over the union of all max-accumulable ranges.
    async fn get_drop_matrix_elements(
        &self,
        server: &str,
        account_id: Option<i64>,
    ) -> Result<Vec<DropMatrixElement>, ServiceError> {
        if account_id.is_none() {
            return Ok(self.ref_db.get_drop_matrix_elements_by_server(server)?);
        }

        let max_accumulable = self
            .time_range
            .get_max_accumulable_time_ranges_by_server(server)
            .await?;
        let mut by_range_id: HashMap<i64, TimeRange> = HashMap::new();
        for per_item in max_accumulable.values() {
            for ranges in per_item.values() {
                for range in ranges {
                    by_range_id.insert(range.range_id, range.clone());
                }
            }
        }
        let time_ranges: Vec<TimeRange> = by_range_id.into_values().collect();
        self.calc_drop_matrix_for_time_ranges(server, &time_ranges, None, None, account_id)
            .await
    }

    /// Aggregate each range, combine quantity and attempt streams, group by
    /// stage then range, zero-fill from the possible-item set.
    async fn calc_drop_matrix_for_time_ranges(
        &self,
        server: &str,
        time_ranges: &[TimeRange],
        stage_id_filter: Option<&[i64]>,
        item_id_filter: Option<&[i64]>,
        account_id: Option<i64>,
    ) -> Result<Vec<DropMatrixElement>, ServiceError> {
        let drop_infos = self
            .drop_info
            .get_drop_infos_with_filters(server, time_ranges, stage_id_filter, item_id_filter)
            .await?;
        let stage_items = stage_item_map_from_drop_infos(&drop_infos);
        let stage_ids = stage_ids_from_drop_infos(&drop_infos);

        let mut combined_results: Vec<CombinedResultForDropMatrix> = Vec::new();
        for range in time_ranges {
            let quantities = self
                .drop_report
                .calc_total_quantity_for_drop_matrix(server, range, &stage_items, account_id)
                .await?;
            let times = self
                .drop_report
                .calc_total_times_for_drop_matrix(server, range, &stage_ids, account_id)
                .await?;
            let uniq_counts = self
                .drop_report
                .calc_quantity_uniq_count_for_drop_matrix(server, range, &stage_items, account_id)
                .await?;
            combined_results.extend(combine_quantity_and_times(
                &quantities,
                &times,
                &uniq_counts,
                range,
            ));
        }

        let mut grouped: HashMap<i64, HashMap<i64, Vec<CombinedResultForDropMatrix>>> =
            HashMap::new();
        for combined in combined_results {
            grouped
                .entry(combined.stage_id)
                .or_default()
                .entry(combined.time_range.range_id)
                .or_default()
                .push(combined);
        }

        let mut stage_times_map: HashMap<i64, i64> = HashMap::new();
        let mut elements = Vec::new();
        for (stage_id, by_range) in grouped {
            for (range_id, group) in by_range {
                let time_range = group[0].time_range.clone();

                let mut drop_item_ids = if range_id == 0 {
                    // Ad-hoc range: the possible-item set has no cache entry,
                    // resolve it from the drop infos overlapping the range.
                    let infos = self
                        .drop_info
                        .get_drop_infos_with_filters(
                            server,
                            std::slice::from_ref(&time_range),
                            Some(std::slice::from_ref(&stage_id)),
                            None,
                        )
                        .await?;
                    let mut item_ids: Vec<i64> =
                        infos.iter().filter_map(|info| info.item_id).collect();
                    item_ids.sort_unstable();
                    item_ids.dedup();
                    item_ids
                } else {
                    self.drop_info
                        .get_item_drop_set(server, stage_id, range_id)
                        .await?
                };
                if let Some(filter) = item_id_filter {
                    if !filter.is_empty() {
                        drop_item_ids.retain(|item_id| filter.contains(item_id));
                    }
                }

                elements.extend(build_elements_for_group(
                    server,
                    stage_id,
                    range_id,
                    &time_range,
                    &group,
                    &drop_item_ids,
                    &mut stage_times_map,
                ));
            }
        }
        Ok(elements)
    }

    async fn convert_to_max_accumulable_result(
        &self,
        server: &str,
        elements: &[DropMatrixElement],
    ) -> Result<DropMatrixQueryResult, ServiceError> {
        let max_accumulable = self
            .time_range
            .get_max_accumulable_time_ranges_by_server(server)
            .await?;
        combine_elements_by_max_accumulable(&max_accumulable, elements)
    }

    /// One output row per element, with each range's interval resolved from
    /// the element itself (ad-hoc) or from reference data.
    async fn convert_to_drop_matrix_query_result(
        &self,
        elements: &[DropMatrixElement],
    ) -> Result<DropMatrixQueryResult, ServiceError> {
        let mut by_range: HashMap<i64, Vec<&DropMatrixElement>> = HashMap::new();
        for element in elements {
            by_range.entry(element.range_id).or_default().push(element);
        }

        let mut matrix = Vec::new();
        for (range_id, group) in by_range {
            let time_range = if range_id == 0 {
                group[0].time_range.clone().ok_or_else(|| {
                    ServiceError::InvariantViolation(
                        "ad-hoc element carries no inline time range".to_string(),
                    )
                })?
            } else {
                self.time_range.get_time_range_by_id(range_id).await?
            };
            for element in group {
                matrix.push(OneDropMatrixElement {
                    stage_id: element.stage_id,
                    item_id: element.item_id,
                    quantity: element.quantity,
                    times: element.times,
                    std_dev: None,
                    time_range: time_range.clone(),
                });
            }
        }
        Ok(DropMatrixQueryResult { matrix })
    }
}

/// Cross quantity rows with attempt rows: for every stage with recorded
/// attempts, each (item, quantity) of that stage becomes one combined result
/// carrying the stage's attempt count.
fn combine_quantity_and_times(
    quantities: &[TotalQuantityResult],
    times: &[TotalTimesResult],
    uniq_counts: &[QuantityUniqCountResult],
    time_range: &TimeRange,
) -> Vec<CombinedResultForDropMatrix> {
    let mut quantity_map: HashMap<i64, HashMap<i64, i64>> = HashMap::new();
    for quantity in quantities {
        quantity_map
            .entry(quantity.stage_id)
            .or_default()
            .insert(quantity.item_id, quantity.total_quantity);
    }

    let mut buckets_map: HashMap<(i64, i64), QuantityBuckets> = HashMap::new();
    for row in uniq_counts {
        buckets_map
            .entry((row.stage_id, row.item_id))
            .or_default()
            .insert(row.quantity, row.count);
    }

    let mut combined = Vec::new();
    for times_result in times {
        let Some(items) = quantity_map.get(&times_result.stage_id) else {
            continue;
        };
        for (&item_id, &quantity) in items {
            combined.push(CombinedResultForDropMatrix {
                stage_id: times_result.stage_id,
                item_id,
                quantity,
                times: times_result.total_times,
                quantity_buckets: buckets_map
                    .get(&(times_result.stage_id, item_id))
                    .cloned()
                    .unwrap_or_default(),
                time_range: time_range.clone(),
            });
        }
    }
    combined
}

/// Emit one element per combined result, then a zero-quantity element for
/// every still-possible item that produced no drops. Zero rows share the
/// stage's observed attempt count.
fn build_elements_for_group(
    server: &str,
    stage_id: i64,
    range_id: i64,
    time_range: &TimeRange,
    group: &[CombinedResultForDropMatrix],
    drop_item_ids: &[i64],
    stage_times_map: &mut HashMap<i64, i64>,
) -> Vec<DropMatrixElement> {
    let inline_range = || (range_id == 0).then(|| time_range.clone());

    let mut drop_set: BTreeSet<i64> = drop_item_ids.iter().copied().collect();
    let mut elements = Vec::new();
    for combined in group {
        elements.push(DropMatrixElement {
            server: server.to_string(),
            stage_id,
            item_id: combined.item_id,
            range_id,
            quantity: combined.quantity,
            times: combined.times,
            quantity_buckets: combined.quantity_buckets.clone(),
            time_range: inline_range(),
        });
        drop_set.remove(&combined.item_id);
        stage_times_map.insert(stage_id, combined.times);
    }
    for item_id in drop_set {
        elements.push(DropMatrixElement {
            server: server.to_string(),
            stage_id,
            item_id,
            range_id,
            quantity: 0,
            times: stage_times_map.get(&stage_id).copied().unwrap_or(0),
            quantity_buckets: QuantityBuckets::new(),
            time_range: inline_range(),
        });
    }
    elements
}

fn combine_drop_matrix_results(
    a: &OneDropMatrixElement,
    b: &OneDropMatrixElement,
) -> Result<OneDropMatrixElement, ServiceError> {
    if a.stage_id != b.stage_id {
        return Err(ServiceError::InvariantViolation(format!(
            "stage id mismatch while combining: {} vs {}",
            a.stage_id, b.stage_id
        )));
    }
    if a.item_id != b.item_id {
        return Err(ServiceError::InvariantViolation(format!(
            "item id mismatch while combining: {} vs {}",
            a.item_id, b.item_id
        )));
    }
    Ok(OneDropMatrixElement {
        stage_id: a.stage_id,
        item_id: a.item_id,
        quantity: a.quantity + b.quantity,
        times: a.times + b.times,
        std_dev: None,
        time_range: a.time_range.clone(),
    })
}

/// Merge each (stage, item)'s elements across its max-accumulable ranges.
/// The emitted interval is the envelope (min start, max end) of the merged
/// ranges.
fn combine_elements_by_max_accumulable(
    max_accumulable: &crate::models::matrix::MaxAccumulableTimeRanges,
    elements: &[DropMatrixElement],
) -> Result<DropMatrixQueryResult, ServiceError> {
    let mut lookup: HashMap<i64, HashMap<i64, HashMap<i64, &DropMatrixElement>>> = HashMap::new();
    for element in elements {
        lookup
            .entry(element.stage_id)
            .or_default()
            .entry(element.item_id)
            .or_default()
            .insert(element.range_id, element);
    }

    let mut matrix = Vec::new();
    for (stage_id, per_item) in max_accumulable {
        let Some(stage_lookup) = lookup.get(stage_id) else {
            continue;
        };
        for (item_id, time_ranges) in per_item {
            let Some(by_range) = stage_lookup.get(item_id) else {
                continue;
            };
            let mut start_time = time_ranges[0].start_time;
            let mut end_time = time_ranges[0].end_time;
            let mut combined: Option<OneDropMatrixElement> = None;
            let mut merged_buckets = QuantityBuckets::new();

            for range in time_ranges {
                let Some(element) = by_range.get(&range.range_id) else {
                    continue;
                };
                let one = OneDropMatrixElement {
                    stage_id: *stage_id,
                    item_id: *item_id,
                    quantity: element.quantity,
                    times: element.times,
                    std_dev: None,
                    time_range: range.clone(),
                };
                if range.start_time < start_time {
                    start_time = range.start_time;
                }
                if range.end_time > end_time {
                    end_time = range.end_time;
                }
                for (&quantity, &count) in &element.quantity_buckets {
                    *merged_buckets.entry(quantity).or_insert(0) += count;
                }
                combined = Some(match combined {
                    None => one,
                    Some(acc) => combine_drop_matrix_results(&acc, &one)?,
                });
            }

            if let Some(mut result) = combined {
                result.std_dev = std_dev_from_buckets(&merged_buckets, result.times);
                result.time_range = TimeRange {
                    range_id: 0,
                    start_time,
                    end_time,
                };
                matrix.push(result);
            }
        }
    }
    Ok(DropMatrixQueryResult { matrix })
}

/// Sample standard deviation of per-attempt drop quantity. Attempts that
/// reported no drop of the item count as zero-quantity observations.
fn std_dev_from_buckets(buckets: &QuantityBuckets, times: i64) -> Option<f64> {
    if times <= 0 {
        return None;
    }
    let reported: i64 = buckets.values().sum();
    let n = (reported + (times - reported).max(0)) as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for (&quantity, &count) in buckets {
        sum += (quantity * count) as f64;
        sum_sq += (quantity * quantity * count) as f64;
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matrix::MaxAccumulableTimeRanges;
    use crate::models::reference::datetime_from_millis;

    fn range(id: i64, start: i64, end: i64) -> TimeRange {
        TimeRange {
            range_id: id,
            start_time: datetime_from_millis(start),
            end_time: datetime_from_millis(end),
        }
    }

    fn element(stage: i64, item: i64, range_id: i64, quantity: i64, times: i64) -> DropMatrixElement {
        DropMatrixElement {
            server: "CN".to_string(),
            stage_id: stage,
            item_id: item,
            range_id,
            quantity,
            times,
            quantity_buckets: QuantityBuckets::new(),
            time_range: None,
        }
    }

    #[test]
    fn combine_crosses_quantities_with_stage_times() {
        let quantities = vec![TotalQuantityResult {
            stage_id: 1,
            item_id: 10,
            total_quantity: 5,
        }];
        let times = vec![TotalTimesResult {
            stage_id: 1,
            total_times: 10,
        }];
        let uniq = vec![
            QuantityUniqCountResult {
                stage_id: 1,
                item_id: 10,
                quantity: 1,
                count: 3,
            },
            QuantityUniqCountResult {
                stage_id: 1,
                item_id: 10,
                quantity: 2,
                count: 1,
            },
        ];
        let combined = combine_quantity_and_times(&quantities, &times, &uniq, &range(7, 0, 1000));
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].quantity, 5);
        assert_eq!(combined[0].times, 10);
        assert_eq!(combined[0].quantity_buckets, QuantityBuckets::from([(1, 3), (2, 1)]));
        assert_eq!(combined[0].time_range.range_id, 7);
    }

    #[test]
    fn stages_without_times_emit_nothing() {
        let quantities = vec![TotalQuantityResult {
            stage_id: 1,
            item_id: 10,
            total_quantity: 5,
        }];
        let combined = combine_quantity_and_times(&quantities, &[], &[], &range(7, 0, 1000));
        assert!(combined.is_empty());
    }

    #[test]
    fn zero_fill_covers_every_possible_item() {
        let time_range = range(7, 0, 1000);
        let group = vec![CombinedResultForDropMatrix {
            stage_id: 1,
            item_id: 10,
            quantity: 5,
            times: 10,
            quantity_buckets: QuantityBuckets::new(),
            time_range: time_range.clone(),
        }];
        let mut stage_times_map = HashMap::new();
        let elements = build_elements_for_group(
            "CN",
            1,
            7,
            &time_range,
            &group,
            &[10, 11],
            &mut stage_times_map,
        );

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].item_id, 10);
        assert_eq!(elements[0].quantity, 5);
        assert_eq!(elements[1].item_id, 11);
        assert_eq!(elements[1].quantity, 0);
        // zero rows share the stage's attempt count
        assert!(elements.iter().all(|el| el.times == 10));
        // persistent range: no inline interval
        assert!(elements.iter().all(|el| el.time_range.is_none()));
    }

    #[test]
    fn ad_hoc_group_carries_its_interval_inline() {
        let time_range = TimeRange::customized(100, 200);
        let group = vec![CombinedResultForDropMatrix {
            stage_id: 1,
            item_id: 10,
            quantity: 1,
            times: 2,
            quantity_buckets: QuantityBuckets::new(),
            time_range: time_range.clone(),
        }];
        let mut stage_times_map = HashMap::new();
        let elements =
            build_elements_for_group("CN", 1, 0, &time_range, &group, &[10, 11], &mut stage_times_map);
        assert!(elements.iter().all(|el| el.range_id == 0));
        assert!(elements.iter().all(|el| el.time_range.as_ref() == Some(&time_range)));
    }

    #[test]
    fn combine_adds_quantities_and_times() {
        let a = OneDropMatrixElement {
            stage_id: 1,
            item_id: 10,
            quantity: 3,
            times: 7,
            std_dev: None,
            time_range: range(1, 1000, 2000),
        };
        let b = OneDropMatrixElement {
            stage_id: 1,
            item_id: 10,
            quantity: 2,
            times: 5,
            std_dev: None,
            time_range: range(2, 2000, 3000),
        };
        let ab = combine_drop_matrix_results(&a, &b).unwrap();
        let ba = combine_drop_matrix_results(&b, &a).unwrap();
        assert_eq!((ab.quantity, ab.times), (5, 12));
        assert_eq!((ba.quantity, ba.times), (5, 12));
    }

    #[test]
    fn combine_rejects_mismatched_keys() {
        let a = OneDropMatrixElement {
            stage_id: 1,
            item_id: 10,
            quantity: 3,
            times: 7,
            std_dev: None,
            time_range: range(1, 1000, 2000),
        };
        let mut b = a.clone();
        b.stage_id = 2;
        assert!(matches!(
            combine_drop_matrix_results(&a, &b),
            Err(ServiceError::InvariantViolation(_))
        ));
        let mut c = a.clone();
        c.item_id = 11;
        assert!(matches!(
            combine_drop_matrix_results(&a, &c),
            Err(ServiceError::InvariantViolation(_))
        ));
    }

    #[test]
    fn max_accumulable_combination_merges_consecutive_ranges() {
        let mut max_accumulable = MaxAccumulableTimeRanges::new();
        max_accumulable.entry(1).or_default().insert(
            10,
            vec![range(1, 1000, 2000), range(2, 2000, 3000)],
        );
        let elements = vec![element(1, 10, 1, 3, 7), element(1, 10, 2, 2, 5)];

        let result = combine_elements_by_max_accumulable(&max_accumulable, &elements).unwrap();
        assert_eq!(result.matrix.len(), 1);
        let one = &result.matrix[0];
        assert_eq!((one.quantity, one.times), (5, 12));
        assert_eq!(one.time_range.start_millis(), 1000);
        assert_eq!(one.time_range.end_millis(), 3000);
        assert_eq!(one.time_range.range_id, 0);
    }

    #[test]
    fn ranges_without_elements_do_not_emit() {
        let mut max_accumulable = MaxAccumulableTimeRanges::new();
        max_accumulable
            .entry(1)
            .or_default()
            .insert(10, vec![range(1, 1000, 2000)]);
        let result =
            combine_elements_by_max_accumulable(&max_accumulable, &[element(2, 9, 1, 1, 1)])
                .unwrap();
        assert!(result.matrix.is_empty());
    }

    #[test]
    fn std_dev_counts_zero_drop_attempts() {
        let buckets = QuantityBuckets::from([(1, 3), (2, 1)]);
        // 10 attempts: quantities 1,1,1,2 and six zeroes.
        // mean = 0.5, E[q^2] = 0.7, variance = 0.45
        let std_dev = std_dev_from_buckets(&buckets, 10).unwrap();
        assert!((std_dev - 0.45f64.sqrt()).abs() < 1e-9);

        assert_eq!(std_dev_from_buckets(&buckets, 0), None);
    }
}

//! Resolves which (stage, item) pairs are possible during which time ranges.
//! Drives zero-fill and the open/closed stage distinction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::caches::Caches;
use crate::error::ServiceError;
use crate::models::reference::{CACHE_TTL, DropInfo, TimeRange};
use crate::ref_db::RefDb;
use crate::time_range::TimeRangeService;

pub struct DropInfoService {
    ref_db: Arc<RefDb>,
    time_range: Arc<TimeRangeService>,
    caches: Arc<Caches>,
}

impl DropInfoService {
    pub fn new(ref_db: Arc<RefDb>, time_range: Arc<TimeRangeService>, caches: Arc<Caches>) -> Self {
        Self {
            ref_db,
            time_range,
            caches,
        }
    }

    /// Every drop info of `server` whose own range overlaps any of
    /// `time_ranges`, optionally narrowed by stage and item ids. Overlap is
    /// tested on wall-clock time so ad-hoc ranges (`range_id == 0`) work.
    /// Stage-only rows (`item_id` = None) pass an item filter untouched.
    pub async fn get_drop_infos_with_filters(
        &self,
        server: &str,
        time_ranges: &[TimeRange],
        stage_id_filter: Option<&[i64]>,
        item_id_filter: Option<&[i64]>,
    ) -> Result<Vec<DropInfo>, ServiceError> {
        let drop_infos = self.ref_db.get_drop_infos_by_server(server)?;
        let ranges_map = self.time_range.get_time_ranges_map_by_server(server).await?;

        Ok(filter_drop_infos(
            drop_infos,
            &ranges_map,
            time_ranges,
            stage_id_filter,
            item_id_filter,
        ))
    }

    /// The ordered set of item ids droppable from (stage, range).
    pub async fn get_item_drop_set(
        &self,
        server: &str,
        stage_id: i64,
        range_id: i64,
    ) -> Result<Vec<i64>, ServiceError> {
        let key = format!("{server}|{stage_id}|{range_id}");
        let (item_ids, _) = self
            .caches
            .item_drop_set
            .get_or_compute(&key, CACHE_TTL, || async {
                let drop_infos = self.ref_db.get_drop_infos_by_server(server)?;
                let mut item_ids: Vec<i64> = drop_infos
                    .iter()
                    .filter(|info| info.stage_id == stage_id && info.range_id == range_id)
                    .filter_map(|info| info.item_id)
                    .collect();
                item_ids.sort_unstable();
                item_ids.dedup();
                Ok::<_, ServiceError>(item_ids)
            })
            .await?;
        Ok(item_ids)
    }

    /// Drop infos whose range is open right now.
    pub async fn get_current_drop_infos_by_server(
        &self,
        server: &str,
    ) -> Result<Vec<DropInfo>, ServiceError> {
        let drop_infos = self.ref_db.get_drop_infos_by_server(server)?;
        let ranges_map = self.time_range.get_time_ranges_map_by_server(server).await?;
        let now = Utc::now();
        Ok(drop_infos
            .into_iter()
            .filter(|info| {
                ranges_map
                    .get(&info.range_id)
                    .is_some_and(|range| range.contains(now))
            })
            .collect())
    }
}

fn filter_drop_infos(
    drop_infos: Vec<DropInfo>,
    ranges_map: &HashMap<i64, TimeRange>,
    time_ranges: &[TimeRange],
    stage_id_filter: Option<&[i64]>,
    item_id_filter: Option<&[i64]>,
) -> Vec<DropInfo> {
    drop_infos
        .into_iter()
        .filter(|info| {
            let Some(own_range) = ranges_map.get(&info.range_id) else {
                return false;
            };
            time_ranges.iter().any(|range| own_range.overlaps(range))
        })
        .filter(|info| match stage_id_filter {
            Some(stage_ids) if !stage_ids.is_empty() => stage_ids.contains(&info.stage_id),
            _ => true,
        })
        .filter(|info| match (item_id_filter, info.item_id) {
            (Some(item_ids), Some(item_id)) if !item_ids.is_empty() => {
                item_ids.contains(&item_id)
            }
            _ => true,
        })
        .collect()
}

/// `stage_id -> droppable item ids`, the shape the quantity query takes.
pub fn stage_item_map_from_drop_infos(drop_infos: &[DropInfo]) -> HashMap<i64, Vec<i64>> {
    let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
    for info in drop_infos {
        let entry = map.entry(info.stage_id).or_default();
        if let Some(item_id) = info.item_id {
            if !entry.contains(&item_id) {
                entry.push(item_id);
            }
        }
    }
    map
}

pub fn stage_ids_from_drop_infos(drop_infos: &[DropInfo]) -> Vec<i64> {
    let mut stage_ids: Vec<i64> = drop_infos.iter().map(|info| info.stage_id).collect();
    stage_ids.sort_unstable();
    stage_ids.dedup();
    stage_ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reference::datetime_from_millis;

    fn range(id: i64, start: i64, end: i64) -> TimeRange {
        TimeRange {
            range_id: id,
            start_time: datetime_from_millis(start),
            end_time: datetime_from_millis(end),
        }
    }

    fn info(stage: i64, item: Option<i64>, range_id: i64) -> DropInfo {
        DropInfo {
            server: "CN".to_string(),
            stage_id: stage,
            item_id: item,
            range_id,
            accumulable: true,
        }
    }

    #[test]
    fn overlap_filtering_works_for_ad_hoc_ranges() {
        let ranges_map =
            HashMap::from([(1, range(1, 1000, 2000)), (2, range(2, 5000, 6000))]);
        let infos = vec![info(1, Some(10), 1), info(2, Some(20), 2)];

        let ad_hoc = TimeRange::customized(1500, 1600);
        let kept = filter_drop_infos(infos, &ranges_map, &[ad_hoc], None, None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].stage_id, 1);
    }

    #[test]
    fn item_filter_keeps_stage_only_rows() {
        let ranges_map = HashMap::from([(1, range(1, 1000, 2000))]);
        let infos = vec![info(1, Some(10), 1), info(1, Some(11), 1), info(1, None, 1)];

        let kept = filter_drop_infos(
            infos,
            &ranges_map,
            &[range(1, 1000, 2000)],
            None,
            Some(&[10]),
        );
        let items: Vec<Option<i64>> = kept.iter().map(|i| i.item_id).collect();
        assert_eq!(items, vec![Some(10), None]);
    }

    #[test]
    fn stage_item_map_collects_unique_items() {
        let infos = vec![
            info(1, Some(10), 1),
            info(1, Some(10), 2),
            info(1, Some(11), 1),
            info(1, None, 1),
        ];
        let map = stage_item_map_from_drop_infos(&infos);
        assert_eq!(map[&1], vec![10, 11]);
        assert_eq!(stage_ids_from_drop_infos(&infos), vec![1]);
    }
}

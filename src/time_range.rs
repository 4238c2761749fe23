//! Time-range resolution, including the per-(stage, item) maximum-accumulable
//! subset over which drop rates are believed stationary.

use std::collections::HashMap;
use std::sync::Arc;

use crate::caches::Caches;
use crate::error::ServiceError;
use crate::models::matrix::MaxAccumulableTimeRanges;
use crate::models::reference::{CACHE_TTL, DropInfo, TimeRange};
use crate::ref_db::RefDb;

pub struct TimeRangeService {
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
}

impl TimeRangeService {
    pub fn new(ref_db: Arc<RefDb>, caches: Arc<Caches>) -> Self {
        Self { ref_db, caches }
    }

    pub async fn get_time_ranges_by_server(
        &self,
        server: &str,
    ) -> Result<Vec<TimeRange>, ServiceError> {
        let (ranges, _) = self
            .caches
            .time_ranges
            .get_or_compute(server, CACHE_TTL, || async {
                Ok::<_, ServiceError>(self.ref_db.get_time_ranges_by_server(server)?)
            })
            .await?;
        Ok(ranges)
    }

    pub async fn get_time_ranges_map_by_server(
        &self,
        server: &str,
    ) -> Result<HashMap<i64, TimeRange>, ServiceError> {
        let (map, _) = self
            .caches
            .time_ranges_map
            .get_or_compute(server, CACHE_TTL, || async {
                let ranges = self.get_time_ranges_by_server(server).await?;
                Ok::<_, ServiceError>(
                    ranges
                        .into_iter()
                        .map(|range| (range.range_id, range))
                        .collect(),
                )
            })
            .await?;
        Ok(map)
    }

    pub async fn get_time_range_by_id(&self, range_id: i64) -> Result<TimeRange, ServiceError> {
        let key = range_id.to_string();
        let (range, _) = self
            .caches
            .time_range_by_id
            .get_or_compute(&key, CACHE_TTL, || async {
                self.ref_db
                    .get_time_range_by_id(range_id)?
                    .ok_or(ServiceError::NotFound("time range"))
            })
            .await?;
        Ok(range)
    }

    /// For each (stage, item): the largest contiguous suffix of ranges over
    /// which the drop rate is unchanged, sorted by start time ascending.
    pub async fn get_max_accumulable_time_ranges_by_server(
        &self,
        server: &str,
    ) -> Result<MaxAccumulableTimeRanges, ServiceError> {
        let (result, _) = self
            .caches
            .max_accumulable_time_ranges
            .get_or_compute(server, CACHE_TTL, || async {
                let drop_infos = self.ref_db.get_drop_infos_by_server(server)?;
                let ranges_map = self.get_time_ranges_map_by_server(server).await?;
                Ok::<_, ServiceError>(max_accumulable_ranges(&drop_infos, &ranges_map))
            })
            .await?;
        Ok(result)
    }

    /// Per stage, the drop-info range with the greatest start time.
    pub async fn get_latest_time_ranges_by_server(
        &self,
        server: &str,
    ) -> Result<HashMap<i64, TimeRange>, ServiceError> {
        let (result, _) = self
            .caches
            .latest_time_ranges
            .get_or_compute(server, CACHE_TTL, || async {
                let drop_infos = self.ref_db.get_drop_infos_by_server(server)?;
                let ranges_map = self.get_time_ranges_map_by_server(server).await?;
                Ok::<_, ServiceError>(latest_ranges(&drop_infos, &ranges_map))
            })
            .await?;
        Ok(result)
    }
}

/// Walk each (stage, item)'s ranges from newest to oldest. The newest range
/// is always part of the result; an older range joins only while the
/// next-newer neighbour is flagged accumulable. The first break ends the
/// walk.
fn max_accumulable_ranges(
    drop_infos: &[DropInfo],
    ranges_map: &HashMap<i64, TimeRange>,
) -> MaxAccumulableTimeRanges {
    let mut by_stage_item: HashMap<(i64, i64), Vec<&DropInfo>> = HashMap::new();
    for info in drop_infos {
        let Some(item_id) = info.item_id else {
            continue;
        };
        if !ranges_map.contains_key(&info.range_id) {
            continue;
        }
        by_stage_item
            .entry((info.stage_id, item_id))
            .or_default()
            .push(info);
    }

    let mut result = MaxAccumulableTimeRanges::new();
    for ((stage_id, item_id), mut infos) in by_stage_item {
        infos.sort_by_key(|info| std::cmp::Reverse(ranges_map[&info.range_id].start_time));

        let mut ranges = Vec::new();
        for (idx, info) in infos.iter().enumerate() {
            if idx > 0 && !infos[idx - 1].accumulable {
                break;
            }
            ranges.push(ranges_map[&info.range_id].clone());
        }
        ranges.sort_by_key(|range| range.start_time);

        if !ranges.is_empty() {
            result
                .entry(stage_id)
                .or_default()
                .insert(item_id, ranges);
        }
    }
    result
}

fn latest_ranges(
    drop_infos: &[DropInfo],
    ranges_map: &HashMap<i64, TimeRange>,
) -> HashMap<i64, TimeRange> {
    let mut result: HashMap<i64, TimeRange> = HashMap::new();
    for info in drop_infos {
        let Some(range) = ranges_map.get(&info.range_id) else {
            continue;
        };
        match result.get(&info.stage_id) {
            Some(current) if current.start_time >= range.start_time => {}
            _ => {
                result.insert(info.stage_id, range.clone());
            }
        }
    }
    result
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

    fn info(stage: i64, item: Option<i64>, range_id: i64, accumulable: bool) -> DropInfo {
        DropInfo {
            server: "CN".to_string(),
            stage_id: stage,
            item_id: item,
            range_id,
            accumulable,
        }
    }

    fn ranges_map(ranges: &[TimeRange]) -> HashMap<i64, TimeRange> {
        ranges.iter().map(|r| (r.range_id, r.clone())).collect()
    }

    #[test]
    fn walk_includes_the_full_accumulable_suffix() {
        let map = ranges_map(&[
            range(1, 1000, 2000),
            range(2, 2000, 3000),
            range(3, 3000, 4000),
        ]);
        let infos = vec![
            info(1, Some(10), 1, true),
            info(1, Some(10), 2, true),
            info(1, Some(10), 3, true),
        ];
        let result = max_accumulable_ranges(&infos, &map);
        let ranges = &result[&1][&10];
        assert_eq!(
            ranges.iter().map(|r| r.range_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn walk_stops_at_the_first_break() {
        let map = ranges_map(&[
            range(1, 1000, 2000),
            range(2, 2000, 3000),
            range(3, 3000, 4000),
        ]);
        // The middle range is not accumulable with its older neighbour.
        let infos = vec![
            info(1, Some(10), 1, true),
            info(1, Some(10), 2, false),
            info(1, Some(10), 3, true),
        ];
        let result = max_accumulable_ranges(&infos, &map);
        let ranges = &result[&1][&10];
        assert_eq!(
            ranges.iter().map(|r| r.range_id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn newest_range_always_included() {
        let map = ranges_map(&[range(1, 1000, 2000)]);
        let infos = vec![info(1, Some(10), 1, false)];
        let result = max_accumulable_ranges(&infos, &map);
        assert_eq!(result[&1][&10].len(), 1);
    }

    #[test]
    fn stage_only_rows_are_ignored() {
        let map = ranges_map(&[range(1, 1000, 2000)]);
        let infos = vec![info(1, None, 1, true)];
        assert!(max_accumulable_ranges(&infos, &map).is_empty());
    }

    #[test]
    fn latest_range_per_stage() {
        let map = ranges_map(&[range(1, 1000, 2000), range(2, 2000, 3000)]);
        let infos = vec![
            info(1, Some(10), 1, true),
            info(1, Some(11), 2, true),
            info(2, None, 1, true),
        ];
        let latest = latest_ranges(&infos, &map);
        assert_eq!(latest[&1].range_id, 2);
        assert_eq!(latest[&2].range_id, 1);
    }
}

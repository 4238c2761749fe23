//! API-surface projection: substitutes external string ids for internal
//! integer ids, converts intervals to millisecond epochs, hides the
//! open-ended sentinel, and applies the open-stage and external-id filters.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::drop_info::DropInfoService;
use crate::drop_pattern::DropPatternElementService;
use crate::error::ServiceError;
use crate::item::ItemService;
use crate::models::matrix::{DropMatrixQueryResult, PatternMatrixQueryResult, TrendQueryResult};
use crate::models::reference::{DropPatternElement, Item, Stage};
use crate::models::shim::{
    ShimDropMatrixElement, ShimDropMatrixQueryResult, ShimDropPatternDrop, ShimItemTrend,
    ShimPatternMatrixElement, ShimPatternMatrixQueryResult, ShimStageTrend, ShimTimeRange,
    ShimTrendQueryResult,
};
use crate::stage::StageService;

pub struct ShimService {
    items: Arc<ItemService>,
    stages: Arc<StageService>,
    drop_info: Arc<DropInfoService>,
    drop_pattern: Arc<DropPatternElementService>,
}

/// Comma-separated external ids; an empty string means no filter.
fn parse_filter(raw: &str) -> Option<HashSet<String>> {
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

impl ShimService {
    pub fn new(
        items: Arc<ItemService>,
        stages: Arc<StageService>,
        drop_info: Arc<DropInfoService>,
        drop_pattern: Arc<DropPatternElementService>,
    ) -> Self {
        Self {
            items,
            stages,
            drop_info,
            drop_pattern,
        }
    }

    pub async fn apply_shim_for_drop_matrix_query(
        &self,
        server: &str,
        show_closed: bool,
        stage_filter_str: &str,
        item_filter_str: &str,
        result: DropMatrixQueryResult,
    ) -> Result<ShimDropMatrixQueryResult, ServiceError> {
        let items_map = self.items.get_items_map_by_id().await?;
        let stages_map = self.stages.get_stages_map_by_id().await?;
        let opening_stage_ids = if show_closed {
            None
        } else {
            let current = self.drop_info.get_current_drop_infos_by_server(server).await?;
            Some(current.iter().map(|info| info.stage_id).collect::<HashSet<_>>())
        };
        project_drop_matrix(
            result,
            &items_map,
            &stages_map,
            opening_stage_ids.as_ref(),
            parse_filter(stage_filter_str).as_ref(),
            parse_filter(item_filter_str).as_ref(),
        )
    }

    pub async fn apply_shim_for_pattern_matrix_query(
        &self,
        result: PatternMatrixQueryResult,
    ) -> Result<ShimPatternMatrixQueryResult, ServiceError> {
        let items_map = self.items.get_items_map_by_id().await?;
        let stages_map = self.stages.get_stages_map_by_id().await?;

        let mut pattern_drops: HashMap<i64, Vec<DropPatternElement>> = HashMap::new();
        for one in &result.pattern_matrix {
            if pattern_drops.contains_key(&one.pattern_id) {
                continue;
            }
            let elements = self
                .drop_pattern
                .get_drop_pattern_elements_by_pattern_id(one.pattern_id)
                .await?;
            pattern_drops.insert(one.pattern_id, elements);
        }

        project_pattern_matrix(result, &items_map, &stages_map, &pattern_drops)
    }

    pub async fn apply_shim_for_trend_query(
        &self,
        result: TrendQueryResult,
    ) -> Result<ShimTrendQueryResult, ServiceError> {
        let items_map = self.items.get_items_map_by_id().await?;
        let stages_map = self.stages.get_stages_map_by_id().await?;
        project_trend(result, &items_map, &stages_map)
    }
}

fn project_drop_matrix(
    result: DropMatrixQueryResult,
    items_map: &HashMap<i64, Item>,
    stages_map: &HashMap<i64, Stage>,
    opening_stage_ids: Option<&HashSet<i64>>,
    stage_filter: Option<&HashSet<String>>,
    item_filter: Option<&HashSet<String>>,
) -> Result<ShimDropMatrixQueryResult, ServiceError> {
    let mut matrix = Vec::new();
    for one in result.matrix {
        if let Some(opening) = opening_stage_ids {
            if !opening.contains(&one.stage_id) {
                continue;
            }
        }
        let stage = stages_map
            .get(&one.stage_id)
            .ok_or(ServiceError::NotFound("stage"))?;
        let item = items_map
            .get(&one.item_id)
            .ok_or(ServiceError::NotFound("item"))?;
        if let Some(filter) = stage_filter {
            if !filter.contains(&stage.ark_stage_id) {
                continue;
            }
        }
        if let Some(filter) = item_filter {
            if !filter.contains(&item.ark_item_id) {
                continue;
            }
        }
        let interval = ShimTimeRange::from(&one.time_range);
        matrix.push(ShimDropMatrixElement {
            stage_id: stage.ark_stage_id.clone(),
            item_id: item.ark_item_id.clone(),
            quantity: one.quantity,
            times: one.times,
            std_dev: one.std_dev,
            start: interval.start,
            end: interval.end,
        });
    }
    Ok(ShimDropMatrixQueryResult { matrix })
}

fn project_pattern_matrix(
    result: PatternMatrixQueryResult,
    items_map: &HashMap<i64, Item>,
    stages_map: &HashMap<i64, Stage>,
    pattern_drops: &HashMap<i64, Vec<DropPatternElement>>,
) -> Result<ShimPatternMatrixQueryResult, ServiceError> {
    let mut pattern_matrix = Vec::new();
    for one in result.pattern_matrix {
        let stage = stages_map
            .get(&one.stage_id)
            .ok_or(ServiceError::NotFound("stage"))?;
        let mut drops = Vec::new();
        for element in pattern_drops.get(&one.pattern_id).into_iter().flatten() {
            let item = items_map
                .get(&element.item_id)
                .ok_or(ServiceError::NotFound("item"))?;
            drops.push(ShimDropPatternDrop {
                item_id: item.ark_item_id.clone(),
                quantity: element.quantity,
            });
        }
        let interval = ShimTimeRange::from(&one.time_range);
        pattern_matrix.push(ShimPatternMatrixElement {
            stage_id: stage.ark_stage_id.clone(),
            pattern_id: one.pattern_id,
            drops,
            quantity: one.quantity,
            times: one.times,
            start: interval.start,
            end: interval.end,
        });
    }
    Ok(ShimPatternMatrixQueryResult { pattern_matrix })
}

fn project_trend(
    result: TrendQueryResult,
    items_map: &HashMap<i64, Item>,
    stages_map: &HashMap<i64, Stage>,
) -> Result<ShimTrendQueryResult, ServiceError> {
    let mut trend = HashMap::new();
    for stage_trend in result.trends {
        let stage = stages_map
            .get(&stage_trend.stage_id)
            .ok_or(ServiceError::NotFound("stage"))?;
        let mut results = HashMap::new();
        for item_trend in stage_trend.results {
            let item = items_map
                .get(&item_trend.item_id)
                .ok_or(ServiceError::NotFound("item"))?;
            results.insert(
                item.ark_item_id.clone(),
                ShimItemTrend {
                    start_time: item_trend.start_time.timestamp_millis(),
                    times: item_trend.times,
                    quantity: item_trend.quantity,
                },
            );
        }
        trend.insert(stage.ark_stage_id.clone(), ShimStageTrend { results });
    }
    Ok(ShimTrendQueryResult { trend })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matrix::OneDropMatrixElement;
    use crate::models::reference::{FAKE_END_TIME_MILLI, TimeRange, datetime_from_millis};

    fn items_map() -> HashMap<i64, Item> {
        HashMap::from([(
            10,
            Item {
                item_id: 10,
                ark_item_id: "30012".to_string(),
                name: "Orirock Cube".to_string(),
                sort_id: 1,
            },
        )])
    }

    fn stages_map() -> HashMap<i64, Stage> {
        let stage = |id: i64, ark: &str| Stage {
            stage_id: id,
            ark_stage_id: ark.to_string(),
            zone_id: 1,
            sort_id: id,
        };
        HashMap::from([(1, stage(1, "main_01-07")), (2, stage(2, "main_04-09"))])
    }

    fn one(stage: i64, start: i64, end: i64) -> OneDropMatrixElement {
        OneDropMatrixElement {
            stage_id: stage,
            item_id: 10,
            quantity: 5,
            times: 10,
            std_dev: None,
            time_range: TimeRange {
                range_id: 0,
                start_time: datetime_from_millis(start),
                end_time: datetime_from_millis(end),
            },
        }
    }

    #[test]
    fn open_ended_interval_serializes_without_end() {
        let result = DropMatrixQueryResult {
            matrix: vec![one(1, 1000, FAKE_END_TIME_MILLI)],
        };
        let shim =
            project_drop_matrix(result, &items_map(), &stages_map(), None, None, None).unwrap();
        assert_eq!(shim.matrix[0].end, None);

        let encoded = serde_json::to_value(&shim.matrix[0]).unwrap();
        assert_eq!(encoded["start"], 1000);
        assert!(encoded.get("end").is_none());
    }

    #[test]
    fn closed_stages_are_dropped_when_requested() {
        let result = DropMatrixQueryResult {
            matrix: vec![one(1, 1000, 2000), one(2, 1000, 2000)],
        };
        let opening = HashSet::from([2]);
        let shim = project_drop_matrix(
            result,
            &items_map(),
            &stages_map(),
            Some(&opening),
            None,
            None,
        )
        .unwrap();
        assert_eq!(shim.matrix.len(), 1);
        assert_eq!(shim.matrix[0].stage_id, "main_04-09");
    }

    #[test]
    fn external_id_filters_apply() {
        let result = DropMatrixQueryResult {
            matrix: vec![one(1, 1000, 2000), one(2, 1000, 2000)],
        };
        let shim = project_drop_matrix(
            result,
            &items_map(),
            &stages_map(),
            None,
            parse_filter("main_01-07").as_ref(),
            None,
        )
        .unwrap();
        assert_eq!(shim.matrix.len(), 1);
        assert_eq!(shim.matrix[0].stage_id, "main_01-07");

        let again = project_drop_matrix(
            DropMatrixQueryResult {
                matrix: vec![one(1, 1000, 2000), one(2, 1000, 2000)],
            },
            &items_map(),
            &stages_map(),
            None,
            parse_filter("main_01-07").as_ref(),
            parse_filter("").as_ref(),
        )
        .unwrap();
        // filtering twice with the same filter yields the same rows
        assert_eq!(again.matrix.len(), 1);
    }

    #[test]
    fn pattern_rows_carry_their_composition() {
        use crate::models::matrix::OnePatternMatrixElement;

        let result = PatternMatrixQueryResult {
            pattern_matrix: vec![OnePatternMatrixElement {
                stage_id: 1,
                pattern_id: 100,
                quantity: 6,
                times: 10,
                time_range: TimeRange {
                    range_id: 7,
                    start_time: datetime_from_millis(1000),
                    end_time: datetime_from_millis(2000),
                },
            }],
        };
        let pattern_drops = HashMap::from([(
            100,
            vec![DropPatternElement {
                pattern_id: 100,
                item_id: 10,
                quantity: 2,
            }],
        )]);

        let shim =
            project_pattern_matrix(result, &items_map(), &stages_map(), &pattern_drops).unwrap();
        assert_eq!(shim.pattern_matrix.len(), 1);
        let one = &shim.pattern_matrix[0];
        assert_eq!(one.stage_id, "main_01-07");
        assert_eq!(one.drops.len(), 1);
        assert_eq!(one.drops[0].item_id, "30012");
        assert_eq!(one.drops[0].quantity, 2);
        assert_eq!((one.start, one.end), (1000, Some(2000)));
    }

    #[test]
    fn filter_parsing_trims_and_ignores_empties() {
        assert_eq!(parse_filter(""), None);
        let parsed = parse_filter("a, b,,c").unwrap();
        assert_eq!(parsed, HashSet::from(["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn unknown_reference_row_is_an_error() {
        let result = DropMatrixQueryResult {
            matrix: vec![OneDropMatrixElement {
                item_id: 999,
                ..one(1, 1000, 2000)
            }],
        };
        assert!(matches!(
            project_drop_matrix(result, &items_map(), &stages_map(), None, None, None),
            Err(ServiceError::NotFound("item"))
        ));
    }
}

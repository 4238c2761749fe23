//! The process-wide cache registry: every named cache instance, the
//! type-erased flusher indexes behind the management `delete` call, the
//! last-modified ledger and the immutable `properties` table.
//!
//! Built exactly once in `main` and shared read-only through `AppState`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{SetCache, Singular};
use crate::models::matrix::MaxAccumulableTimeRanges;
use crate::models::reference::{Account, DropPatternElement, Item, Stage, TimeRange};
use crate::models::shim::{
    ShimDropMatrixQueryResult, ShimPatternMatrixQueryResult, ShimTrendQueryResult,
};
use crate::ref_db::RefDb;

type Flusher = Box<dyn Fn() + Send + Sync>;

pub struct Caches {
    pub items: Arc<Singular<Vec<Item>>>,
    pub items_map_by_id: Arc<Singular<HashMap<i64, Item>>>,
    pub items_map_by_ark_id: Arc<Singular<HashMap<String, Item>>>,

    pub stages: Arc<Singular<Vec<Stage>>>,
    pub stages_map_by_id: Arc<Singular<HashMap<i64, Stage>>>,
    pub stages_map_by_ark_id: Arc<Singular<HashMap<String, Stage>>>,

    pub time_ranges: Arc<SetCache<Vec<TimeRange>>>,
    pub time_ranges_map: Arc<SetCache<HashMap<i64, TimeRange>>>,
    pub time_range_by_id: Arc<SetCache<TimeRange>>,
    pub max_accumulable_time_ranges: Arc<SetCache<MaxAccumulableTimeRanges>>,
    pub latest_time_ranges: Arc<SetCache<HashMap<i64, TimeRange>>>,

    pub item_drop_set: Arc<SetCache<Vec<i64>>>,
    pub drop_pattern_elements: Arc<SetCache<Vec<DropPatternElement>>>,

    pub shim_max_accumulable_drop_matrix_results: Arc<SetCache<ShimDropMatrixQueryResult>>,
    pub shim_latest_pattern_matrix_results: Arc<SetCache<ShimPatternMatrixQueryResult>>,
    pub shim_saved_trend_results: Arc<SetCache<ShimTrendQueryResult>>,

    pub account_by_token: Arc<SetCache<Account>>,

    /// Wall clock at which a named result was last (re)computed, keyed by a
    /// human-readable tag. Never expires.
    pub last_modified_time: Arc<SetCache<DateTime<Utc>>>,

    /// Reference configuration loaded once at startup.
    pub properties: HashMap<String, String>,

    singular_flushers: HashMap<&'static str, Flusher>,
    set_flushers: HashMap<&'static str, Flusher>,
}

fn register_singular<T>(
    index: &mut HashMap<&'static str, Flusher>,
    cache: &Arc<Singular<T>>,
) where
    T: Clone + Send + Sync + 'static,
{
    let c = cache.clone();
    index.insert(cache.name(), Box::new(move || c.delete()));
}

fn register_set<T>(index: &mut HashMap<&'static str, Flusher>, cache: &Arc<SetCache<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    let c = cache.clone();
    index.insert(cache.name(), Box::new(move || c.flush()));
}

impl Caches {
    pub fn new(ref_db: &RefDb) -> anyhow::Result<Self> {
        let items = Singular::new("items");
        let items_map_by_id = Singular::new("itemsMapById");
        let items_map_by_ark_id = Singular::new("itemsMapByArkId");

        let stages = Singular::new("stages");
        let stages_map_by_id = Singular::new("stagesMapById");
        let stages_map_by_ark_id = Singular::new("stagesMapByArkId");

        let time_ranges = SetCache::new("timeRanges#server");
        let time_ranges_map = SetCache::new("timeRangesMap#server");
        let time_range_by_id = SetCache::new("timeRange#rangeId");
        let max_accumulable_time_ranges = SetCache::new("maxAccumulableTimeRanges#server");
        let latest_time_ranges = SetCache::new("latestTimeRanges#server");

        let item_drop_set = SetCache::new("itemDropSet#server|stageId|rangeId");
        let drop_pattern_elements = SetCache::new("dropPatternElements#patternId");

        let shim_max_accumulable_drop_matrix_results =
            SetCache::new("shimMaxAccumulableDropMatrixResults#server|showClosed");
        let shim_latest_pattern_matrix_results =
            SetCache::new("shimLatestPatternMatrixResults#server");
        let shim_saved_trend_results = SetCache::new("shimSavedTrendResults#server");

        let account_by_token = SetCache::new("account#token");
        let last_modified_time = SetCache::new("lastModifiedTime#key");

        let mut singular_flushers = HashMap::new();
        let mut set_flushers = HashMap::new();

        register_singular(&mut singular_flushers, &items);
        register_singular(&mut singular_flushers, &items_map_by_id);
        register_singular(&mut singular_flushers, &items_map_by_ark_id);
        register_singular(&mut singular_flushers, &stages);
        register_singular(&mut singular_flushers, &stages_map_by_id);
        register_singular(&mut singular_flushers, &stages_map_by_ark_id);

        register_set(&mut set_flushers, &time_ranges);
        register_set(&mut set_flushers, &time_ranges_map);
        register_set(&mut set_flushers, &time_range_by_id);
        register_set(&mut set_flushers, &max_accumulable_time_ranges);
        register_set(&mut set_flushers, &latest_time_ranges);
        register_set(&mut set_flushers, &item_drop_set);
        register_set(&mut set_flushers, &drop_pattern_elements);
        register_set(&mut set_flushers, &shim_max_accumulable_drop_matrix_results);
        register_set(&mut set_flushers, &shim_latest_pattern_matrix_results);
        register_set(&mut set_flushers, &shim_saved_trend_results);
        register_set(&mut set_flushers, &account_by_token);
        register_set(&mut set_flushers, &last_modified_time);

        let properties = ref_db.get_properties()?;

        Ok(Self {
            items,
            items_map_by_id,
            items_map_by_ark_id,
            stages,
            stages_map_by_id,
            stages_map_by_ark_id,
            time_ranges,
            time_ranges_map,
            time_range_by_id,
            max_accumulable_time_ranges,
            latest_time_ranges,
            item_drop_set,
            drop_pattern_elements,
            shim_max_accumulable_drop_matrix_results,
            shim_latest_pattern_matrix_results,
            shim_saved_trend_results,
            account_by_token,
            last_modified_time,
            properties,
            singular_flushers,
            set_flushers,
        })
    }

    /// Invalidate a cache by registered name. With a `key` the name targets a
    /// keyed family (the whole family is flushed); without one a singular
    /// slot is preferred, falling back to a family. Unknown names no-op.
    pub fn delete(&self, name: &str, key: Option<&str>) {
        if key.is_some() {
            match self.set_flushers.get(name) {
                Some(flush) => flush(),
                None => tracing::debug!("cache delete: no keyed cache named {name}"),
            }
            return;
        }
        if let Some(flush) = self.singular_flushers.get(name) {
            flush();
        } else if let Some(flush) = self.set_flushers.get(name) {
            flush();
        } else {
            tracing::debug!("cache delete: no cache named {name}");
        }
    }

    pub fn stamp_last_modified(&self, tag: &str) {
        self.last_modified_time
            .set(tag, Utc::now(), std::time::Duration::ZERO);
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Servers this deployment aggregates for.
    pub fn servers(&self) -> Vec<String> {
        self.property("servers")
            .unwrap_or("CN,US,JP,KR")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_known_server(&self, server: &str) -> bool {
        self.servers().iter().any(|s| s == server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn empty_caches() -> Caches {
        let ref_db = RefDb::open_in_memory().unwrap();
        Caches::new(&ref_db).unwrap()
    }

    #[test]
    fn delete_with_key_flushes_the_family() {
        let caches = empty_caches();
        caches.item_drop_set.set("CN|1|10", vec![1], Duration::ZERO);
        caches.item_drop_set.set("CN|2|10", vec![2], Duration::ZERO);
        caches.delete("itemDropSet#server|stageId|rangeId", Some("CN|1|10"));
        assert_eq!(caches.item_drop_set.get("CN|1|10"), None);
        assert_eq!(caches.item_drop_set.get("CN|2|10"), None);
    }

    #[test]
    fn delete_without_key_prefers_singular_then_set() {
        let caches = empty_caches();
        caches.items.set(Vec::new(), Duration::ZERO);
        caches.delete("items", None);
        assert_eq!(caches.items.get(), None);

        caches.time_ranges.set("CN", Vec::new(), Duration::ZERO);
        caches.delete("timeRanges#server", None);
        assert_eq!(caches.time_ranges.get("CN"), None);
    }

    #[test]
    fn delete_unknown_name_is_a_no_op() {
        let caches = empty_caches();
        caches.delete("noSuchCache", None);
        caches.delete("noSuchCache", Some("k"));
    }

    #[test]
    fn default_server_list() {
        let caches = empty_caches();
        assert_eq!(caches.servers(), vec!["CN", "US", "JP", "KR"]);
        assert!(caches.is_known_server("CN"));
        assert!(!caches.is_known_server("EU"));
    }
}

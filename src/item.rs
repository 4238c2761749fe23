//! Item reference data, cached for 24 h and joined by id at projection time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::caches::Caches;
use crate::error::ServiceError;
use crate::models::reference::{CACHE_TTL, Item};
use crate::ref_db::RefDb;

pub struct ItemService {
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
}

impl ItemService {
    pub fn new(ref_db: Arc<RefDb>, caches: Arc<Caches>) -> Self {
        Self { ref_db, caches }
    }

    pub async fn get_items(&self) -> Result<Vec<Item>, ServiceError> {
        let (items, _) = self
            .caches
            .items
            .get_or_compute(CACHE_TTL, || async {
                Ok::<_, ServiceError>(self.ref_db.get_items()?)
            })
            .await?;
        Ok(items)
    }

    pub async fn get_item_by_id(&self, item_id: i64) -> Result<Item, ServiceError> {
        let items_map = self.get_items_map_by_id().await?;
        items_map
            .get(&item_id)
            .cloned()
            .ok_or(ServiceError::NotFound("item"))
    }

    pub async fn get_items_map_by_id(&self) -> Result<HashMap<i64, Item>, ServiceError> {
        let (map, _) = self
            .caches
            .items_map_by_id
            .get_or_compute(CACHE_TTL, || async {
                let items = self.get_items().await?;
                Ok::<_, ServiceError>(
                    items
                        .into_iter()
                        .map(|item| (item.item_id, item))
                        .collect(),
                )
            })
            .await?;
        Ok(map)
    }

    pub async fn get_items_map_by_ark_id(&self) -> Result<HashMap<String, Item>, ServiceError> {
        let (map, _) = self
            .caches
            .items_map_by_ark_id
            .get_or_compute(CACHE_TTL, || async {
                let items = self.get_items().await?;
                Ok::<_, ServiceError>(
                    items
                        .into_iter()
                        .map(|item| (item.ark_item_id.clone(), item))
                        .collect(),
                )
            })
            .await?;
        Ok(map)
    }
}

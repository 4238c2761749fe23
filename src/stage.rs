//! Stage reference data; same caching shape as items.

use std::collections::HashMap;
use std::sync::Arc;

use crate::caches::Caches;
use crate::error::ServiceError;
use crate::models::reference::{CACHE_TTL, Stage};
use crate::ref_db::RefDb;

pub struct StageService {
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
}

impl StageService {
    pub fn new(ref_db: Arc<RefDb>, caches: Arc<Caches>) -> Self {
        Self { ref_db, caches }
    }

    pub async fn get_stages(&self) -> Result<Vec<Stage>, ServiceError> {
        let (stages, _) = self
            .caches
            .stages
            .get_or_compute(CACHE_TTL, || async {
                Ok::<_, ServiceError>(self.ref_db.get_stages()?)
            })
            .await?;
        Ok(stages)
    }

    pub async fn get_stages_map_by_id(&self) -> Result<HashMap<i64, Stage>, ServiceError> {
        let (map, _) = self
            .caches
            .stages_map_by_id
            .get_or_compute(CACHE_TTL, || async {
                let stages = self.get_stages().await?;
                Ok::<_, ServiceError>(
                    stages
                        .into_iter()
                        .map(|stage| (stage.stage_id, stage))
                        .collect(),
                )
            })
            .await?;
        Ok(map)
    }

    pub async fn get_stages_map_by_ark_id(&self) -> Result<HashMap<String, Stage>, ServiceError> {
        let (map, _) = self
            .caches
            .stages_map_by_ark_id
            .get_or_compute(CACHE_TTL, || async {
                let stages = self.get_stages().await?;
                Ok::<_, ServiceError>(
                    stages
                        .into_iter()
                        .map(|stage| (stage.ark_stage_id.clone(), stage))
                        .collect(),
                )
            })
            .await?;
        Ok(map)
    }
}

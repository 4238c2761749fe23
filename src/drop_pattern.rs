//! Drop-pattern composition lookups, cached per pattern id.

use std::sync::Arc;

use crate::caches::Caches;
use crate::error::ServiceError;
use crate::models::reference::{CACHE_TTL, DropPatternElement};
use crate::ref_db::RefDb;

pub struct DropPatternElementService {
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
}

impl DropPatternElementService {
    pub fn new(ref_db: Arc<RefDb>, caches: Arc<Caches>) -> Self {
        Self { ref_db, caches }
    }

    pub async fn get_drop_pattern_elements_by_pattern_id(
        &self,
        pattern_id: i64,
    ) -> Result<Vec<DropPatternElement>, ServiceError> {
        let key = pattern_id.to_string();
        let (elements, _) = self
            .caches
            .drop_pattern_elements
            .get_or_compute(&key, CACHE_TTL, || async {
                Ok::<_, ServiceError>(
                    self.ref_db
                        .get_drop_pattern_elements_by_pattern_id(pattern_id)?,
                )
            })
            .await?;
        Ok(elements)
    }
}

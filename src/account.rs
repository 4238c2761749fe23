//! Resolves the requesting account from the `Authorization` header.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::caches::Caches;
use crate::error::ServiceError;
use crate::models::reference::{Account, CACHE_TTL};
use crate::ref_db::RefDb;

pub struct AccountService {
    ref_db: Arc<RefDb>,
    caches: Arc<Caches>,
}

impl AccountService {
    pub fn new(ref_db: Arc<RefDb>, caches: Arc<Caches>) -> Self {
        Self { ref_db, caches }
    }

    /// `None` when no credentials are attached or the token is unknown.
    pub async fn resolve_from_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<Account>, ServiceError> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let raw = value.to_str().map_err(|_| {
            ServiceError::InvalidParameter("authorization header is not valid UTF-8".to_string())
        })?;
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if token.is_empty() {
            return Ok(None);
        }

        let lookup = self
            .caches
            .account_by_token
            .get_or_compute(token, CACHE_TTL, || async {
                self.ref_db
                    .get_account_by_token(token)?
                    .ok_or(ServiceError::NotFound("account"))
            })
            .await;
        match lookup {
            Ok((account, _)) => Ok(Some(account)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::handlers::{error_response, validate_server};

#[derive(Debug, Deserialize)]
pub struct CacheDeleteQuery {
    pub name: String,
    pub key: Option<String>,
}

/// Drop a named cache immediately. Unknown names are ignored.
pub async fn delete_cache(
    State(state): State<AppState>,
    Query(query): Query<CacheDeleteQuery>,
) -> impl IntoResponse {
    state.caches.delete(&query.name, query.key.as_deref());
    StatusCode::NO_CONTENT
}

pub async fn refresh_drop_matrix(
    State(state): State<AppState>,
    Path(server): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate_server(&state, &server)?;
    state
        .drop_matrix
        .refresh_all_drop_matrix_elements(&server)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refresh_pattern_matrix(
    State(state): State<AppState>,
    Path(server): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate_server(&state, &server)?;
    state
        .pattern_matrix
        .refresh_all_pattern_matrix_elements(&server)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refresh_trend(
    State(state): State<AppState>,
    Path(server): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate_server(&state, &server)?;
    state
        .trend
        .refresh_saved_trend_results(&server)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

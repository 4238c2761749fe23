use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::drop_matrix::matrix_last_modified_tag;
use crate::handlers::{error_response, validate_server};
use crate::models::reference::{FAKE_END_TIME_MILLI, TimeRange};
use crate::models::shim::ShimDropMatrixQueryResult;
use crate::pattern_matrix::pattern_matrix_last_modified_tag;
use crate::trend::trend_last_modified_tag;

/// Upper bound on ad-hoc queries per advanced request.
const MAX_ADVANCED_QUERIES: usize = 5;

/// `source` path segment: `global` or `personal`.
fn is_personal(source: &str) -> Result<bool, (StatusCode, String)> {
    match source {
        "global" => Ok(false),
        "personal" => Ok(true),
        other => Err((
            StatusCode::BAD_REQUEST,
            format!("source must be global or personal, got {other}"),
        )),
    }
}

async fn resolve_account(
    state: &AppState,
    headers: &HeaderMap,
    personal: bool,
) -> Result<Option<i64>, (StatusCode, String)> {
    if !personal {
        return Ok(None);
    }
    let account = state
        .accounts
        .resolve_from_headers(headers)
        .await
        .map_err(error_response)?;
    match account {
        Some(account) => Ok(Some(account.account_id)),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "personal results require an authenticated account".to_string(),
        )),
    }
}

/// Attach the ledger's recompute time as a `Last-Modified` header.
fn with_last_modified(state: &AppState, tag: &str, mut response: Response) -> Response {
    if let Some(at) = state.caches.last_modified_time.get(tag) {
        let value = at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = header::HeaderValue::from_str(&value) {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }
    response
}

pub async fn get_drop_matrix(
    State(state): State<AppState>,
    Path((server, source)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    validate_server(&state, &server)?;
    let personal = is_personal(&source)?;
    let account_id = resolve_account(&state, &headers, personal).await?;

    let result = state
        .drop_matrix
        .get_shim_max_accumulable_drop_matrix_results(&server, true, "", "", account_id)
        .await
        .map_err(error_response)?;

    let response = Json(result).into_response();
    if account_id.is_none() {
        return Ok(with_last_modified(&state, &matrix_last_modified_tag(&server), response));
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct MatrixQuery {
    #[serde(default)]
    pub show_closed_zones: bool,
    #[serde(rename = "stageFilter", default)]
    pub stage_filter: String,
    #[serde(rename = "itemFilter", default)]
    pub item_filter: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// The filterable public matrix surface.
pub async fn get_drop_matrix_filtered(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Query(query): Query<MatrixQuery>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    validate_server(&state, &server)?;
    let personal = is_personal(query.source.as_deref().unwrap_or("global"))?;
    let account_id = resolve_account(&state, &headers, personal).await?;

    let result = state
        .drop_matrix
        .get_shim_max_accumulable_drop_matrix_results(
            &server,
            query.show_closed_zones,
            &query.stage_filter,
            &query.item_filter,
            account_id,
        )
        .await
        .map_err(error_response)?;

    let cacheable =
        account_id.is_none() && query.stage_filter.is_empty() && query.item_filter.is_empty();
    let response = Json(result).into_response();
    if cacheable {
        return Ok(with_last_modified(&state, &matrix_last_modified_tag(&server), response));
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct AdvancedQueryRequest {
    pub queries: Vec<AdvancedQuery>,
}

/// One ad-hoc matrix query over a caller-supplied interval, in external ids
/// and millisecond epochs. A missing `end` means open-ended.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedQuery {
    pub server: String,
    pub stage_id: String,
    #[serde(default)]
    pub item_ids: Vec<String>,
    pub start: i64,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub is_personal: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedQueryResponse {
    pub advanced_results: Vec<ShimDropMatrixQueryResult>,
}

pub async fn advanced_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AdvancedQueryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if request.queries.is_empty() || request.queries.len() > MAX_ADVANCED_QUERIES {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("between 1 and {MAX_ADVANCED_QUERIES} queries are allowed"),
        ));
    }

    let mut advanced_results = Vec::new();
    for query in &request.queries {
        validate_server(&state, &query.server)?;
        if query.end.is_some_and(|end| end <= query.start) {
            return Err((
                StatusCode::BAD_REQUEST,
                "end must be after start".to_string(),
            ));
        }
        let account_id = resolve_account(&state, &headers, query.is_personal).await?;

        let stages_map = state
            .stages
            .get_stages_map_by_ark_id()
            .await
            .map_err(error_response)?;
        let stage = stages_map.get(&query.stage_id).ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("unknown stage: {}", query.stage_id),
            )
        })?;

        let items_map = state
            .items
            .get_items_map_by_ark_id()
            .await
            .map_err(error_response)?;
        let mut item_ids = Vec::with_capacity(query.item_ids.len());
        for ark_item_id in &query.item_ids {
            let item = items_map.get(ark_item_id).ok_or_else(|| {
                (
                    StatusCode::NOT_FOUND,
                    format!("unknown item: {ark_item_id}"),
                )
            })?;
            item_ids.push(item.item_id);
        }

        let range =
            TimeRange::customized(query.start, query.end.unwrap_or(FAKE_END_TIME_MILLI));
        let result = state
            .drop_matrix
            .get_shim_customized_drop_matrix_results(
                &query.server,
                &range,
                std::slice::from_ref(&stage.stage_id),
                &item_ids,
                account_id,
            )
            .await
            .map_err(error_response)?;
        advanced_results.push(result);
    }

    Ok(Json(AdvancedQueryResponse { advanced_results }))
}

pub async fn get_pattern_matrix(
    State(state): State<AppState>,
    Path((server, source)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    validate_server(&state, &server)?;
    let personal = is_personal(&source)?;
    let account_id = resolve_account(&state, &headers, personal).await?;

    let result = state
        .pattern_matrix
        .get_shim_latest_pattern_matrix_results(&server, account_id)
        .await
        .map_err(error_response)?;

    let response = Json(result).into_response();
    if account_id.is_none() {
        return Ok(with_last_modified(
            &state,
            &pattern_matrix_last_modified_tag(&server),
            response,
        ));
    }
    Ok(response)
}

pub async fn get_trends(
    State(state): State<AppState>,
    Path(server): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    validate_server(&state, &server)?;

    let result = state
        .trend
        .get_shim_saved_trend_results(&server)
        .await
        .map_err(error_response)?;

    let response = Json(result).into_response();
    Ok(with_last_modified(&state, &trend_last_modified_tag(&server), response))
}

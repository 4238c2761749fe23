use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::handlers::error_response;

pub async fn get_items(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let items = state.items.get_items().await.map_err(error_response)?;
    Ok(Json(items))
}

pub async fn get_item_by_id(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let item_id: i64 = item_id.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "itemId must be an integer".to_string(),
        )
    })?;

    let item = state
        .items
        .get_item_by_id(item_id)
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

pub mod admin;
pub mod items;
pub mod results;

use axum::http::StatusCode;

use crate::AppState;
use crate::error::ServiceError;

/// Map a service error onto the wire, logging server-side failures.
pub(crate) fn error_response(err: ServiceError) -> (StatusCode, String) {
    let status = err.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("request failed: {err}");
    }
    (status, err.to_string())
}

pub(crate) fn validate_server(state: &AppState, server: &str) -> Result<(), (StatusCode, String)> {
    if state.caches.is_known_server(server) {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            format!("unknown server: {server}"),
        ))
    }
}

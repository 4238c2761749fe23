use axum::http::StatusCode;
use thiserror::Error;

/// Error surface of the service layer. Handlers map variants to HTTP status
/// codes at the boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("account required")]
    Unauthorized,

    /// Mismatched keys while combining matrix results. Signals corrupted
    /// input; never expected in normal operation.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("reference store error: {0}")]
    Db(#[from] anyhow::Error),

    #[error("analytics query failed: {0}")]
    Analytics(#[from] clickhouse::error::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::InvariantViolation(_)
            | ServiceError::Db(_)
            | ServiceError::Analytics(_)
            | ServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::gate::Rejection};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable or refused the write.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// The board or the user record has not loaded yet.
    #[error("still loading")]
    Loading,
    /// The placement gate refused the attempt.
    #[error("placement rejected: {0}")]
    Rejected(Rejection),
    /// Coordinates outside the board.
    #[error("cell ({x}, {y}) is outside the board")]
    OutOfBounds { x: i64, y: i64 },
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<Rejection> for ServiceError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Loading => ServiceError::Loading,
            other => ServiceError::Rejected(other),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or still loading.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Loading => AppError::ServiceUnavailable("still loading".into()),
            ServiceError::Rejected(rejection) => AppError::Conflict(rejection.to_string()),
            err @ ServiceError::OutOfBounds { .. } => AppError::BadRequest(err.to_string()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::cooldown::TimeLeft;

    #[test]
    fn rejections_map_to_conflict_with_their_reason() {
        let left = TimeLeft::from_duration(Duration::from_secs(5));
        let err: AppError = ServiceError::from(Rejection::CoolingDown(left)).into();
        assert!(matches!(&err, AppError::Conflict(message) if message.contains("5 seconds")));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn loading_is_unavailable_and_out_of_bounds_is_bad_request() {
        let loading: AppError = ServiceError::from(Rejection::Loading).into();
        assert_eq!(loading.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let outside: AppError = ServiceError::OutOfBounds { x: -1, y: 0 }.into();
        assert_eq!(outside.into_response().status(), StatusCode::BAD_REQUEST);
    }
}

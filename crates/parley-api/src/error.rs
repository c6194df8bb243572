//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(parley_core::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
}

impl From<parley_core::Error> for ApiError {
    fn from(err: parley_core::Error) -> Self {
        match err {
            parley_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            parley_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Core(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Core(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let err: ApiError = parley_core::Error::NotFound("conv-1".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: ApiError = parley_core::Error::InvalidInput("empty".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err: ApiError = parley_core::Error::Store("down".to_string()).into();
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::engine::EngineError;
use evhelper_store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Registration is closed on this instance")]
    RegistrationClosed,

    #[error("An account with this email already exists")]
    DuplicateEmail,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error")]
    Internal(#[source] StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::Engine(EngineError::NotFound),
            StoreError::DuplicateEmail => ApiError::DuplicateEmail,
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_)
                | EngineError::InsufficientFunds { .. }
                | EngineError::SelfAccept => (StatusCode::BAD_REQUEST, e.to_string()),
                EngineError::AlreadyTaken | EngineError::WrongStatus(_) => {
                    (StatusCode::CONFLICT, e.to_string())
                }
                EngineError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
                EngineError::NotAuthorized => (StatusCode::FORBIDDEN, e.to_string()),
                EngineError::Store(inner) => {
                    tracing::error!(error = %inner, "store error while serving request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::RegistrationClosed => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::DuplicateEmail => (StatusCode::CONFLICT, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Internal(inner) => {
                tracing::error!(error = %inner, "store error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

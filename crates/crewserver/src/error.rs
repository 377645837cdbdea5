use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use crewcore::EngineError;
use serde::Serialize;
use thiserror::Error;

/// Error returned by every handler, mapped onto an HTTP status
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(EngineError::Validation(_)) | ApiError::BadRequest(_) => "validation",
            ApiError::Engine(EngineError::NotFound { .. }) => "not_found",
            ApiError::Engine(EngineError::Conflict(_)) => "conflict",
            ApiError::Engine(EngineError::Store(_)) => "store",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::Validation(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(EngineError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
        })
    }
}

//! HTTP-facing error type.
//!
//! Component errors ([`StoreError`], [`ParseError`], [`GenerationError`],
//! [`EmbeddingError`]) convert into [`AppError`], which is the only type the
//! handlers return. Every error renders as `{ "message": "..." }`.
//!
//! | Variant | Status |
//! |---------|--------|
//! | `Validation` | 400 |
//! | `NotFound` | 404 |
//! | `Persistence` | 400 |
//! | `Parse` | 502 |
//! | `Generation(Timeout)` | 504 |
//! | `Generation(Network)`, `Embedding(Disabled / Network)` | 503 |
//! | `Generation(Model / Malformed / Disabled)`, `Embedding(Backend / Malformed)` | 502 |
//! | `Internal`, `Embedding(Cache)` | 500 |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::generation::GenerationError;
use crate::parse::ParseError;
use crate::projects::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Persistence(String),
    #[error("risk classification failed: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        AppError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Persistence(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Parse(_) => StatusCode::BAD_GATEWAY,
            AppError::Generation(e) => match e {
                GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                GenerationError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
                GenerationError::Model { .. }
                | GenerationError::Malformed(_)
                | GenerationError::Disabled => StatusCode::BAD_GATEWAY,
            },
            AppError::Embedding(e) => match e {
                EmbeddingError::Disabled | EmbeddingError::Network(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                EmbeddingError::Backend(_) | EmbeddingError::Malformed(_) => {
                    StatusCode::BAD_GATEWAY
                }
                EmbeddingError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => AppError::Validation(msg),
            StoreError::NotFound(_) => AppError::NotFound("Project could not be found.".to_string()),
            StoreError::Persistence(msg) => AppError::Persistence(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({ "message": message }))).into_response()
    }
}

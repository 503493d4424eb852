use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AppError {
    #[error("Model inference failed: {0}")]
    ModelError(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Service temporarily unavailable: {0}")]
    ResourceError(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error("Embedding provider failed: {0}")]
    EmbeddingError(String),

    #[error("Store operation failed: {0}")]
    StoreError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Tool ingestion failed: {0}")]
    IngestionError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::ModelError(e) => {
                tracing::error!(error = %e, "Model inference error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ValidationError(msg) => {
                tracing::warn!(error = %msg, "Validation error");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::ResourceError(msg) => {
                tracing::warn!(error = %msg, "Resource error");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::TokenizationError(msg) => {
                tracing::error!(error = %msg, "Tokenization error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::EmbeddingError(msg) => {
                tracing::error!(error = %msg, "Embedding provider error");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::StoreError(msg) => {
                tracing::error!(error = %msg, "Store error");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::ConfigError(msg) => {
                tracing::warn!(error = %msg, "Configuration error");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::IngestionError(msg) => {
                tracing::warn!(error = %msg, "Ingestion error");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::ModelError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::ResourceError(format!("Embedding request timed out: {}", err))
        } else {
            AppError::EmbeddingError(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

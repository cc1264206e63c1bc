//! Service error types
//!
//! Internal plumbing uses `anyhow` with context; this enum is the boundary
//! type the HTTP layer and the CLI reason about.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors surfaced by the inference service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Artifact directory missing, incomplete, or unparsable weights/config
    #[error("failed to load model: {0:#}")]
    ModelLoad(#[source] anyhow::Error),

    /// `tokenizer.json` missing or unparsable, or no usable pad/eos token
    #[error("failed to load tokenizer: {0:#}")]
    TokenizerLoad(#[source] anyhow::Error),

    /// Client supplied parameters that can never produce a generation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Tokenization, forward pass, sampling or decoding failed
    #[error("generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),
}

impl ServiceError {
    /// Shorthand for [`ServiceError::InvalidRequest`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status the error maps onto
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ModelLoad(_) | Self::TokenizerLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body returned for failed requests
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human readable error message
    pub error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Result alias for service-boundary operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::invalid("max_length must be positive").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Generation(anyhow::anyhow!("nan logits")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::ModelLoad(anyhow::anyhow!("missing")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_display_keeps_context_chain() {
        let err = anyhow::anyhow!("config.json not found").context("Failed to resolve artifact");
        let msg = ServiceError::ModelLoad(err).to_string();
        assert!(msg.contains("Failed to resolve artifact"));
        assert!(msg.contains("config.json not found"));
    }
}

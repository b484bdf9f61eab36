use crate::engines::EngineType;
use crate::registry::Operation;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error("Unsupported format .{extension} for {operation}; accepted: {}", .accepted.join(", "))]
    UnsupportedFormat {
        operation: Operation,
        extension: String,
        accepted: Vec<&'static str>,
    },

    #[error("Conversion failed in {backend} backend: {cause}")]
    ConversionFailed { backend: EngineType, cause: String },

    #[error("Engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conversion(backend: EngineType, cause: impl std::fmt::Display) -> Self {
        AppError::ConversionFailed {
            backend,
            cause: cause.to_string(),
        }
    }

    /// Machine-readable tag carried in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::UnsupportedFormat { .. } => "unsupported_format",
            AppError::ConversionFailed { .. } => "conversion_error",
            AppError::EngineNotAvailable(_) => "engine_unavailable",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::UnknownOperation(_) => "unknown_operation",
            AppError::IoError(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::UnsupportedFormat { .. } => StatusCode::BAD_REQUEST,
            AppError::ConversionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::EngineNotAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            AppError::IoError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // IO and internal details stay in the log
        let message = match &self {
            AppError::IoError(_) | AppError::Internal(_) => {
                error!("Request failed: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let mut body = json!({
            "error": message,
            "kind": self.kind(),
        });
        if let AppError::UnsupportedFormat { accepted, .. } = &self {
            body["accepted"] = json!(accepted);
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

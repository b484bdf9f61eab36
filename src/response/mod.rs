//! Materialization of converter output into an owned HTTP payload.

use crate::engines::{Artifact, EngineType};
use crate::error::{AppError, Result};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

/// Converted document held fully in memory, independent of any workspace.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub data: Bytes,
    pub filename: String,
    pub content_type: &'static str,
}

/// Read the artifact into memory. Must complete before the workspace is released.
pub async fn materialize(artifact: Artifact, backend: EngineType) -> Result<ConversionResult> {
    let data = tokio::fs::read(&artifact.path)
        .await
        .map_err(|e| AppError::conversion(backend, format!("output unreadable: {}", e.kind())))?;

    if data.is_empty() {
        return Err(AppError::conversion(backend, "produced an empty file"));
    }

    Ok(ConversionResult {
        data: Bytes::from(data),
        filename: artifact.filename,
        content_type: artifact.content_type,
    })
}

/// Quote-safe `Content-Disposition` value.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

impl IntoResponse for ConversionResult {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, self.content_type.to_string()),
                (header::CONTENT_DISPOSITION, content_disposition(&self.filename)),
            ],
            self.data,
        )
            .into_response()
    }
}

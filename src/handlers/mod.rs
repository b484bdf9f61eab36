use crate::error::{AppError, Result};
use crate::pipeline::Pipeline;
use crate::registry::Operation;
use crate::response::ConversionResult;
use crate::staging::Upload;
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub struct AppState {
    pub pipeline: Pipeline,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::Validation(format!("Failed to parse multipart data: {}", e.body_text()))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "true" | "1")
}

/// `POST /convert/:operation` - convert the uploaded file(s)
pub async fn convert_handler(
    State(state): State<Arc<AppState>>,
    Path(operation): Path<String>,
    mut multipart: Multipart,
) -> Result<ConversionResult> {
    let operation: Operation = operation.parse()?;
    let mut uploads = Vec::new();
    let mut options = state.pipeline.default_options();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" | "files" => {
                let filename = field
                    .file_name()
                    .ok_or_else(|| AppError::Validation("No filename provided".to_string()))?
                    .to_string();

                let data = field.bytes().await.map_err(multipart_error)?;

                info!("Received file: {} ({} bytes)", filename, data.len());
                uploads.push(Upload::new(filename, data));
            }
            "imagesOnOwnPage" => {
                if let Ok(value) = field.text().await {
                    options.images_on_own_page = parse_flag(&value);
                }
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    state.pipeline.run(operation, uploads, options).await
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "docmill"
    }))
}

/// Information endpoint - lists operations and accepted formats
pub async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let operations: Vec<_> = Operation::ALL
        .iter()
        .map(|op| {
            json!({
                "operation": op,
                "path": format!("/convert/{}", op.slug()),
                "method": "POST",
                "accepted_extensions": op.accepted_extensions(),
                "multiple_files": op.accepts_batch(),
            })
        })
        .collect();

    Json(json!({
        "service": "docmill",
        "version": env!("CARGO_PKG_VERSION"),
        "engines": state.pipeline.registry().availability(),
        "operations": operations,
        "fields": {
            "file": "The file to convert (required; repeat for images-to-pdf, in page order)",
            "imagesOnOwnPage": "Boolean - place embedded images on their own page (text-only docx renderer)"
        },
        "endpoints": {
            "health": { "path": "/health", "method": "GET" },
            "info": { "path": "/info", "method": "GET" }
        }
    }))
}

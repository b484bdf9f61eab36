//! docmill: a document conversion service.
//!
//! Accepts an uploaded PDF, Word document or image(s), converts it inside a
//! disposable per-request workspace, and returns the converted bytes.
//!
//! ```text
//! handlers ─→ pipeline ─→ staging ─→ registry ─→ engines ─→ response
//!                │                                             │
//!                └── workspace (acquire/release) ── audit ←────┘
//! ```

pub mod audit;
pub mod config;
pub mod docx;
pub mod engines;
pub mod error;
pub mod handlers;
pub mod pdf;
pub mod pipeline;
pub mod registry;
pub mod response;
pub mod staging;
pub mod workspace;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use handlers::{convert_handler, health_handler, info_handler, AppState};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the application router around shared state.
pub fn build_app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/convert/:operation", post(convert_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/", get(info_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

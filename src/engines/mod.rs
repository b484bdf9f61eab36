mod document;
mod image;
mod libreoffice;

pub use self::image::{flatten_to_rgb, ImageEngine};
pub use document::DocumentEngine;
pub use libreoffice::LibreOfficeEngine;

use crate::error::{AppError, Result};
use crate::registry::Operation;
use crate::staging::StagedFile;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Conversion options passed to engines
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Give each embedded image its own page in the library docx renderer
    pub images_on_own_page: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            images_on_own_page: true,
        }
    }
}

/// Output file produced by an engine, still inside the workspace.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    Document,
    LibreOffice,
    Image,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineType::Document => "document",
            EngineType::LibreOffice => "libreoffice",
            EngineType::Image => "image",
        };
        f.write_str(name)
    }
}

/// Trait that all conversion engines must implement
#[async_trait]
pub trait ConvertEngine: Send + Sync {
    fn engine_type(&self) -> EngineType;

    /// Check if the engine is available (dependencies installed)
    async fn is_available(&self) -> bool;

    /// Convert staged inputs, writing the result into `output_dir`.
    ///
    /// Every internal failure surfaces as [`AppError::ConversionFailed`].
    async fn convert(
        &self,
        operation: Operation,
        inputs: &[StagedFile],
        output_dir: &Path,
        options: &ConvertOptions,
    ) -> Result<Artifact>;
}

/// Run CPU-bound conversion work off the async runtime, folding panics
/// into a conversion error for `backend`.
pub(crate) async fn run_blocking<T, F>(backend: EngineType, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::conversion(backend, format!("converter task aborted: {}", e)))?
}

pub(crate) fn single_input(backend: EngineType, inputs: &[StagedFile]) -> Result<&StagedFile> {
    match inputs {
        [only] => Ok(only),
        _ => Err(AppError::conversion(
            backend,
            format!("expected exactly one input, got {}", inputs.len()),
        )),
    }
}

//! The conversion pipeline.
//!
//! ```text
//! Received → Staged → Dispatched → Converted → Materialized → (Logged) → Cleaned
//!     └──────────┴─────────┴───────────┴──────────┴──→ Failed ──→ Cleaned
//! ```
//!
//! Validation and format checks finish before any backend runs. The output
//! is read into memory before the workspace is released, and the workspace
//! is released on every path. Audit failures never reach the caller.

use crate::audit::{record_detached, AuditRecord, AuditSink};
use crate::engines::ConvertOptions;
use crate::error::{AppError, Result};
use crate::registry::{ConverterRegistry, Operation};
use crate::response::{materialize, ConversionResult};
use crate::staging::{stage, StagedFile, Upload};
use crate::workspace::{Workspace, WorkspaceManager};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const INPUT_SUBDIR: &str = "input";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Staged,
    Dispatched,
    Converted,
    Materialized,
    Logged,
    Cleaned,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct Pipeline {
    workspaces: WorkspaceManager,
    registry: ConverterRegistry,
    audit: Arc<dyn AuditSink>,
    default_options: ConvertOptions,
}

impl Pipeline {
    pub fn new(
        workspaces: WorkspaceManager,
        registry: ConverterRegistry,
        audit: Arc<dyn AuditSink>,
        default_options: ConvertOptions,
    ) -> Self {
        Self {
            workspaces,
            registry,
            audit,
            default_options,
        }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn default_options(&self) -> ConvertOptions {
        self.default_options.clone()
    }

    /// Run one request end to end.
    pub async fn run(
        &self,
        operation: Operation,
        uploads: Vec<Upload>,
        options: ConvertOptions,
    ) -> Result<ConversionResult> {
        debug!("{} request: {}", operation, Stage::Received);
        validate_uploads(operation, &uploads)?;

        let workspace = self.workspaces.acquire().await?;
        let outcome = self
            .convert_in(&workspace, operation, &uploads, &options)
            .await;

        if let Err(e) = &outcome {
            warn!("{} request {}: {}", operation, Stage::Failed, e);
        }

        workspace.release().await;
        debug!("{} request: {}", operation, Stage::Cleaned);
        outcome
    }

    async fn convert_in(
        &self,
        workspace: &Workspace,
        operation: Operation,
        uploads: &[Upload],
        options: &ConvertOptions,
    ) -> Result<ConversionResult> {
        let mut staged: Vec<StagedFile> = Vec::with_capacity(uploads.len());
        for upload in uploads {
            staged.push(stage(workspace, upload, INPUT_SUBDIR).await?);
        }
        debug!("{} request: {} {} file(s)", operation, Stage::Staged, staged.len());

        // Every file is checked before any backend runs.
        let mut engine = None;
        for file in &staged {
            engine = Some(self.registry.resolve(operation, &file.extension)?);
        }
        let engine = engine.ok_or_else(|| AppError::Validation("no file provided".to_string()))?;
        let backend = engine.engine_type();
        debug!("{} request: {} to {}", operation, Stage::Dispatched, backend);

        let artifact = engine
            .convert(operation, &staged, &workspace.output_dir(), options)
            .await?;
        debug!("{} request: {}", operation, Stage::Converted);

        let result = materialize(artifact, backend).await?;
        debug!(
            "{} request: {} ({} bytes)",
            operation,
            Stage::Materialized,
            result.data.len()
        );

        info!(
            "Converted {} via {} engine -> {} ({} bytes)",
            staged[0].original_name,
            backend,
            result.filename,
            result.data.len()
        );

        record_detached(
            Arc::clone(&self.audit),
            AuditRecord::new(operation.audit_kind(), staged[0].original_name.clone()),
        );
        debug!("{} request: {}", operation, Stage::Logged);

        Ok(result)
    }
}

fn validate_uploads(operation: Operation, uploads: &[Upload]) -> Result<()> {
    if uploads.is_empty() {
        return Err(AppError::Validation("no file provided".to_string()));
    }
    if !operation.accepts_batch() && uploads.len() > 1 {
        return Err(AppError::Validation(format!(
            "{} accepts exactly one file, got {}",
            operation,
            uploads.len()
        )));
    }
    Ok(())
}

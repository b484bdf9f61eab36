//! Best-effort audit trail of completed conversions.
//!
//! Records are written from a detached task. A failing store is logged and
//! otherwise ignored; it never reaches the HTTP response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub kind: &'static str,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(kind: &'static str, original_filename: impl Into<String>) -> Self {
        Self {
            kind,
            original_filename: original_filename.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Write `record` in the background; errors are logged and dropped.
pub fn record_detached(sink: Arc<dyn AuditSink>, record: AuditRecord) {
    tokio::spawn(async move {
        match sink.record(&record).await {
            Ok(()) => debug!(
                "Audited {} of {}",
                record.kind, record.original_filename
            ),
            Err(e) => warn!(
                "Dropping audit record for {} ({}): {}",
                record.original_filename, record.kind, e
            ),
        }
    });
}

/// Sink used when no audit store is configured.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        info!(
            kind = record.kind,
            filename = %record.original_filename,
            at = %record.created_at,
            "conversion completed"
        );
        Ok(())
    }
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS conversion_audit (
    id BIGSERIAL PRIMARY KEY,
    kind TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)";

/// Postgres-backed sink. The pool connects lazily, so an unreachable store
/// only shows up as per-record failures.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn connect_lazy(url: &str) -> Result<Self, AuditError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(3))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), AuditError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO conversion_audit (kind, original_filename, created_at) VALUES ($1, $2, $3)",
        )
        .bind(record.kind)
        .bind(&record.original_filename)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Build the sink for an optional connection string. Startup never fails on
/// audit problems; a bad URL degrades to the log sink.
pub async fn from_url(url: Option<&str>) -> Arc<dyn AuditSink> {
    let Some(url) = url else {
        info!("No audit store configured; audit records go to the log");
        return Arc::new(LogAuditSink);
    };

    match PostgresAuditSink::connect_lazy(url) {
        Ok(sink) => {
            if let Err(e) = sink.ensure_schema().await {
                warn!("Audit schema setup failed, will retry per record: {}", e);
            }
            Arc::new(sink)
        }
        Err(e) => {
            warn!("Invalid audit store URL, falling back to log sink: {}", e);
            Arc::new(LogAuditSink)
        }
    }
}

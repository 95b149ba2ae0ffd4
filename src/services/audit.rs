//! Audit sinks for committed circulation changes

use async_trait::async_trait;

use crate::{error::AppResult, models::AuditEntry, repository::audit_logs::AuditLogsRepository};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()>;
}

/// Persists entries in `audit_logs`
pub struct PgAuditSink {
    repository: AuditLogsRepository,
}

impl PgAuditSink {
    pub fn new(repository: AuditLogsRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()> {
        self.repository.create(entry).await
    }
}

/// Emits entries as structured log events on the `audit` target
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()> {
        tracing::info!(
            target: "audit",
            actor_id = ?entry.actor_id,
            action = entry.action,
            entity_type = entry.entity_type,
            entity_id = entry.entity_id,
            details = %entry.details,
            at = %entry.at,
            "circulation change recorded"
        );
        Ok(())
    }
}

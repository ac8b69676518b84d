use crate::models::{QueryFilters, TenantId};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Structured audit events. Emission is fire-and-forget; the query path
/// never blocks on, or fails because of, the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RagQuery {
        request_id: String,
        org_id: String,
        user_id: String,
        query: String,
        filters: QueryFilters,
        result_count: usize,
        processing_time_ms: f64,
    },
    TenantErasure {
        org_id: String,
        user_id: String,
        namespace: String,
    },
}

impl AuditEvent {
    pub fn rag_query(
        request_id: &str,
        tenant: &TenantId,
        query: &str,
        filters: &QueryFilters,
        result_count: usize,
        processing_time_ms: f64,
    ) -> Self {
        Self::RagQuery {
            request_id: request_id.to_string(),
            org_id: tenant.org_id.clone(),
            user_id: tenant.user_id.clone(),
            query: query.to_string(),
            filters: filters.clone(),
            result_count,
            processing_time_ms,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events as structured tracing records on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match event {
            AuditEvent::RagQuery {
                request_id,
                org_id,
                user_id,
                query,
                result_count,
                processing_time_ms,
                ..
            } => {
                info!(
                    target: "audit",
                    %request_id,
                    %org_id,
                    %user_id,
                    %query,
                    result_count,
                    processing_time_ms,
                    "rag_query"
                );
            }
            AuditEvent::TenantErasure {
                org_id,
                user_id,
                namespace,
            } => {
                info!(target: "audit", %org_id, %user_id, %namespace, "tenant_erasure");
            }
        }
    }
}

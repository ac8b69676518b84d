use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The tenant pair. Every index operation is scoped to exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TenantId {
    pub org_id: String,
    pub user_id: String,
}

impl TenantId {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// One email as handed over by the document store. Immutable except for the
/// embedding-status pair, which only the store itself flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub org_id: String,
    pub user_id: String,
    pub text_content: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    pub thread_id: Option<String>,
    pub is_embedded: bool,
    pub embedded_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Denormalized field map stored with every vector so filtering and
    /// citation never need a secondary lookup.
    pub fn metadata(&self) -> Value {
        json!({
            "email_id": self.document_id,
            "thread_id": self.thread_id.clone().unwrap_or_default(),
            "subject": self.subject.clone().unwrap_or_default(),
            "sender": self.sender,
            "sender_name": self.sender_name.clone().unwrap_or_default(),
            "sent_at": self.sent_at.map(|at| at.to_rfc3339()).unwrap_or_default(),
            "org_id": self.org_id,
            "user_id": self.user_id,
        })
    }
}

/// A token-bounded slice of one document, derived deterministically by the
/// chunker and never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_text: String,
    pub chunk_index: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector_id: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

/// One similarity hit, already above the relevance floor by the time it
/// leaves the index gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub vector_id: String,
    pub score: f32,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerSource {
    pub email_id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    RetrieveNormalize,
    ContextReconstruct,
    Analyze,
    ComplianceReview,
    AnswerCompose,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageKind::RetrieveNormalize => "retrieve-normalize",
            StageKind::ContextReconstruct => "context-reconstruct",
            StageKind::Analyze => "analyze",
            StageKind::ComplianceReview => "compliance-review",
            StageKind::AnswerCompose => "answer-compose",
        };
        f.write_str(name)
    }
}

/// Wall-clock per stage, recorded for observability only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct StageTimings {
    pub normalize_ms: f64,
    pub reconstruct_ms: f64,
    pub analyze_ms: f64,
    pub compliance_ms: f64,
    pub compose_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub request_id: String,
    pub query: String,
    pub filters: QueryFilters,
    pub retrieval_count: usize,
    pub processing_time_ms: f64,
    pub stage_timings: Option<StageTimings>,
}

/// The final artifact of a query. Constructed once, immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer_text: String,
    pub sources: Vec<AnswerSource>,
    pub answer_complete: bool,
    pub confidence: Confidence,
    pub limitations: Vec<String>,
    pub metadata: AnswerMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VectorizationReport {
    pub vectorized_count: usize,
    pub total_chunks: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizationStatus {
    pub total: usize,
    pub embedded: usize,
    pub pending: usize,
    pub vector_count: usize,
    pub ready: bool,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NamespaceStats {
    pub vector_count: usize,
}

/// Tunables shared across ingestion and query paths.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub max_tokens_per_chunk: usize,
    pub chunk_overlap: usize,
    pub embedding_dimension: usize,
    pub min_relevance_score: f32,
    pub max_retrieval_results: usize,
    pub upsert_batch_size: usize,
    pub redaction_enabled: bool,
    pub max_ingest_errors: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 512,
            chunk_overlap: 50,
            embedding_dimension: 1536,
            min_relevance_score: 0.7,
            max_retrieval_results: 20,
            upsert_batch_size: 100,
            redaction_enabled: true,
            max_ingest_errors: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_metadata_carries_tenant_and_citation_fields() {
        let document = Document {
            document_id: "mail-1".to_string(),
            org_id: "acme".to_string(),
            user_id: "u-7".to_string(),
            text_content: "hello".to_string(),
            sent_at: Some("2024-03-01T10:00:00Z".parse().unwrap()),
            sender: "ceo@acme.com".to_string(),
            sender_name: Some("The CEO".to_string()),
            subject: Some("Q2 plan".to_string()),
            thread_id: Some("t-1".to_string()),
            is_embedded: false,
            embedded_at: None,
        };

        let metadata = document.metadata();
        assert_eq!(metadata["email_id"], "mail-1");
        assert_eq!(metadata["org_id"], "acme");
        assert_eq!(metadata["user_id"], "u-7");
        assert_eq!(metadata["sender"], "ceo@acme.com");
        assert_eq!(metadata["sent_at"], "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn metadata_defaults_missing_optionals_to_empty_strings() {
        let document = Document {
            document_id: "mail-2".to_string(),
            org_id: "acme".to_string(),
            user_id: "u-7".to_string(),
            text_content: String::new(),
            sent_at: None,
            sender: "a@b.c".to_string(),
            sender_name: None,
            subject: None,
            thread_id: None,
            is_embedded: false,
            embedded_at: None,
        };

        let metadata = document.metadata();
        assert_eq!(metadata["thread_id"], "");
        assert_eq!(metadata["subject"], "");
        assert_eq!(metadata["sent_at"], "");
    }
}

use crate::error::{IndexError, StoreError};
use crate::models::{Document, NamespaceStats, RetrievedFragment, TenantId, VectorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Which documents to select from the store by embedding status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedFilter {
    All,
    Pending,
    Embedded,
}

/// The relational document collection, owned elsewhere. This core only ever
/// reads documents and flips their embedding-status flag.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(
        &self,
        tenant: &TenantId,
        filter: EmbeddedFilter,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count_documents(
        &self,
        tenant: &TenantId,
        filter: EmbeddedFilter,
    ) -> Result<usize, StoreError>;

    async fn mark_embedded(
        &self,
        document_id: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Raw namespace-partitioned nearest-neighbor store. Only the
/// [`IndexGateway`](crate::index::IndexGateway) is allowed to call this; the
/// gateway is where the namespace contract and the relevance floor live.
#[async_trait]
pub trait VectorIndexService: Send + Sync {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError>;

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &Value,
        include_metadata: bool,
    ) -> Result<Vec<RetrievedFragment>, IndexError>;

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<(), IndexError>;

    async fn delete_by_filter(&self, namespace: &str, filter: &Value) -> Result<(), IndexError>;

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError>;

    async fn namespace_stats(&self, namespace: &str) -> Result<NamespaceStats, IndexError>;
}

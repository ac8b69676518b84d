use crate::error::IndexError;
use crate::filters::validate_filter;
use crate::models::{NamespaceStats, RagConfig, RetrievedFragment, VectorRecord};
use crate::traits::VectorIndexService;
use serde_json::Value;
use tracing::{debug, info};

/// The only path from this core to the vector-index service.
///
/// Every operation requires a non-empty namespace; an empty one is a
/// programming-contract violation rejected before any network call. Query
/// filters must carry the tenant pair, and the minimum-relevance floor is
/// applied locally on results rather than delegated upstream, since upstream
/// `top_k` semantics may fill the quota with below-threshold matches.
pub struct IndexGateway<S> {
    service: S,
    min_relevance_score: f32,
    upsert_batch_size: usize,
}

impl<S: VectorIndexService> IndexGateway<S> {
    pub fn new(service: S, config: &RagConfig) -> Self {
        Self {
            service,
            min_relevance_score: config.min_relevance_score,
            upsert_batch_size: config.upsert_batch_size.max(1),
        }
    }

    fn require_namespace(namespace: &str) -> Result<(), IndexError> {
        if namespace.trim().is_empty() {
            return Err(IndexError::MissingNamespace);
        }
        Ok(())
    }

    /// Upsert records in batches. Idempotent by `vector_id`: a re-upsert
    /// overwrites. Reports success or failure per call, no partial-record
    /// accounting.
    pub async fn upsert(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), IndexError> {
        Self::require_namespace(namespace)?;

        if records.is_empty() {
            debug!(namespace, "no vectors to upsert");
            return Ok(());
        }

        for batch in records.chunks(self.upsert_batch_size) {
            self.service.upsert(namespace, batch).await?;
        }

        info!(namespace, count = records.len(), "upserted vectors");
        Ok(())
    }

    /// Similarity search, then local relevance-floor filtering.
    pub async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &Value,
        include_metadata: bool,
    ) -> Result<Vec<RetrievedFragment>, IndexError> {
        Self::require_namespace(namespace)?;

        if !validate_filter(filter) {
            return Err(IndexError::MissingTenantFilter);
        }

        let matches = self
            .service
            .query(namespace, vector, top_k, filter, include_metadata)
            .await?;

        let returned = matches.len();
        let fragments: Vec<RetrievedFragment> = matches
            .into_iter()
            .filter(|fragment| fragment.score >= self.min_relevance_score)
            .collect();

        info!(
            namespace,
            top_k,
            returned,
            above_floor = fragments.len(),
            "vector query"
        );
        Ok(fragments)
    }

    pub async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<(), IndexError> {
        Self::require_namespace(namespace)?;

        if ids.is_empty() {
            return Ok(());
        }

        self.service.delete_by_ids(namespace, ids).await?;
        info!(namespace, count = ids.len(), "deleted vectors by id");
        Ok(())
    }

    pub async fn delete_by_filter(&self, namespace: &str, filter: &Value) -> Result<(), IndexError> {
        Self::require_namespace(namespace)?;

        if !validate_filter(filter) {
            return Err(IndexError::MissingTenantFilter);
        }

        self.service.delete_by_filter(namespace, filter).await?;
        info!(namespace, "deleted vectors by filter");
        Ok(())
    }

    /// Full tenant erasure.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError> {
        Self::require_namespace(namespace)?;
        self.service.delete_namespace(namespace).await?;
        info!(namespace, "deleted namespace");
        Ok(())
    }

    pub async fn namespace_stats(&self, namespace: &str) -> Result<NamespaceStats, IndexError> {
        Self::require_namespace(namespace)?;
        self.service.namespace_stats(namespace).await
    }
}

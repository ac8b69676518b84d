use crate::error::IndexError;
use crate::filters::{namespace, TenantFilter};
use crate::index::IndexGateway;
use crate::models::{QueryFilters, RetrievedFragment, TenantId};
use crate::traits::VectorIndexService;
use tracing::debug;

/// Issue the single tenant-scoped similarity query for a request.
///
/// Returns fragments that already passed the relevance floor. An empty
/// result is not an error; the caller distinguishes "nothing embedded yet"
/// from "no match" with a vectorization-status check.
pub async fn retrieve<S: VectorIndexService>(
    gateway: &IndexGateway<S>,
    tenant: &TenantId,
    query_vector: &[f32],
    filters: &QueryFilters,
    top_k: usize,
) -> Result<Vec<RetrievedFragment>, IndexError> {
    let filter = TenantFilter::from_query(tenant, filters).build();
    let fragments = gateway
        .query(&namespace(tenant), query_vector, top_k, &filter, true)
        .await?;

    debug!(
        org_id = %tenant.org_id,
        user_id = %tenant.user_id,
        count = fragments.len(),
        "retrieval complete"
    );
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NamespaceStats, RagConfig, VectorRecord};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    struct CapturingIndexService {
        requests: Arc<Mutex<Vec<(String, Value)>>>,
        matches: Vec<RetrievedFragment>,
    }

    #[async_trait]
    impl crate::traits::VectorIndexService for CapturingIndexService {
        async fn upsert(&self, _namespace: &str, _records: &[VectorRecord]) -> Result<(), IndexError> {
            Ok(())
        }

        async fn query(
            &self,
            namespace: &str,
            _vector: &[f32],
            _top_k: usize,
            filter: &Value,
            _include_metadata: bool,
        ) -> Result<Vec<RetrievedFragment>, IndexError> {
            self.requests
                .lock()
                .unwrap()
                .push((namespace.to_string(), filter.clone()));
            Ok(self.matches.clone())
        }

        async fn delete_by_ids(&self, _namespace: &str, _ids: &[String]) -> Result<(), IndexError> {
            Ok(())
        }

        async fn delete_by_filter(&self, _namespace: &str, _filter: &Value) -> Result<(), IndexError> {
            Ok(())
        }

        async fn delete_namespace(&self, _namespace: &str) -> Result<(), IndexError> {
            Ok(())
        }

        async fn namespace_stats(&self, _namespace: &str) -> Result<NamespaceStats, IndexError> {
            Ok(NamespaceStats::default())
        }
    }

    #[tokio::test]
    async fn retrieval_is_namespace_scoped_and_tenant_filtered() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let service = CapturingIndexService {
            requests: requests.clone(),
            matches: vec![RetrievedFragment {
                vector_id: "m-1_chunk_0".to_string(),
                score: 0.81,
                metadata: json!({"org_id": "acme", "user_id": "u-1"}),
            }],
        };
        let gateway = IndexGateway::new(service, &RagConfig::default());
        let tenant = TenantId::new("acme", "u-1");

        let fragments = retrieve(
            &gateway,
            &tenant,
            &[0.1, 0.2],
            &QueryFilters {
                sender: Some("boss@acme.com".to_string()),
                ..Default::default()
            },
            20,
        )
        .await
        .unwrap();

        assert_eq!(fragments.len(), 1);
        assert!(fragments.iter().all(|fragment| fragment.score >= 0.7));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (namespace, filter) = &requests[0];
        assert_eq!(namespace, "org_acme_user_u-1");
        assert_eq!(filter["$and"][0]["org_id"]["$eq"], "acme");
        assert_eq!(filter["$and"][0]["user_id"]["$eq"], "u-1");
        assert_eq!(filter["$and"][1]["sender"]["$eq"], "boss@acme.com");
    }
}

use crate::error::IndexError;
use crate::models::{NamespaceStats, RetrievedFragment, VectorRecord};
use crate::traits::VectorIndexService;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// HTTP client for a Pinecone-style namespace-partitioned index.
pub struct PineconeStore {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl PineconeStore {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, IndexError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;

        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, IndexError> {
        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::Backend {
                backend: "pinecone".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorIndexService for PineconeStore {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError> {
        let vectors = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.vector_id,
                    "values": record.embedding,
                    "metadata": record.metadata,
                })
            })
            .collect::<Vec<_>>();

        self.post(
            "vectors/upsert",
            &json!({ "vectors": vectors, "namespace": namespace }),
        )
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &Value,
        include_metadata: bool,
    ) -> Result<Vec<RetrievedFragment>, IndexError> {
        let parsed = self
            .post(
                "query",
                &json!({
                    "vector": vector,
                    "topK": top_k,
                    "namespace": namespace,
                    "filter": filter,
                    "includeMetadata": include_metadata,
                }),
            )
            .await?;

        let matches = parsed
            .pointer("/matches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut fragments = Vec::with_capacity(matches.len());
        for hit in matches {
            let vector_id = hit
                .pointer("/id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = hit
                .pointer("/score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as f32;
            let metadata = hit
                .pointer("/metadata")
                .cloned()
                .unwrap_or(Value::Null);

            fragments.push(RetrievedFragment {
                vector_id,
                score,
                metadata,
            });
        }

        Ok(fragments)
    }

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<(), IndexError> {
        self.post(
            "vectors/delete",
            &json!({ "ids": ids, "namespace": namespace }),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_filter(&self, namespace: &str, filter: &Value) -> Result<(), IndexError> {
        self.post(
            "vectors/delete",
            &json!({ "filter": filter, "namespace": namespace }),
        )
        .await?;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError> {
        self.post(
            "vectors/delete",
            &json!({ "deleteAll": true, "namespace": namespace }),
        )
        .await?;
        Ok(())
    }

    async fn namespace_stats(&self, namespace: &str) -> Result<NamespaceStats, IndexError> {
        let parsed = self.post("describe_index_stats", &json!({})).await?;

        let vector_count = parsed
            .pointer(&format!("/namespaces/{namespace}/vectorCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        Ok(NamespaceStats { vector_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_must_be_a_valid_url() {
        assert!(PineconeStore::new("not a url", "key").is_err());
        assert!(PineconeStore::new("https://index.example.net", "key").is_ok());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let store = PineconeStore::new("https://index.example.net/", "key").unwrap();
        assert_eq!(store.endpoint, "https://index.example.net");
    }
}

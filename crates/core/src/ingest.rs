use crate::chunking::{chunk_text, ChunkingConfig, HeuristicTokenCounter, TokenCounter};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::filters::namespace;
use crate::index::IndexGateway;
use crate::models::{
    Chunk, Document, RagConfig, TenantId, VectorRecord, VectorizationReport, VectorizationStatus,
};
use crate::traits::{DocumentStore, EmbeddedFilter, VectorIndexService};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Drives chunking, embedding and upserting for a tenant's pending
/// documents. Commits are per document: a failure on one document is
/// captured and the run continues, so a crashed or partial run resumes
/// cleanly on retry.
pub struct IngestionCoordinator<D, E, S> {
    documents: D,
    embedder: E,
    index: IndexGateway<S>,
    chunking: ChunkingConfig,
    token_counter: Box<dyn TokenCounter>,
    max_errors: usize,
}

impl<D, E, S> IngestionCoordinator<D, E, S>
where
    D: DocumentStore,
    E: Embedder,
    S: VectorIndexService,
{
    pub fn new(documents: D, embedder: E, index: IndexGateway<S>, config: &RagConfig) -> Self {
        Self {
            documents,
            embedder,
            index,
            chunking: ChunkingConfig {
                max_tokens_per_chunk: config.max_tokens_per_chunk,
                chunk_overlap: config.chunk_overlap,
            },
            token_counter: Box::new(HeuristicTokenCounter),
            max_errors: config.max_ingest_errors,
        }
    }

    pub fn with_token_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    /// Vectorize a tenant's documents. Skips already-embedded documents
    /// unless `force_reindex`; re-upserts are idempotent by vector id either
    /// way.
    pub async fn vectorize(
        &self,
        tenant: &TenantId,
        batch_size: usize,
        force_reindex: bool,
    ) -> Result<VectorizationReport> {
        let selection = if force_reindex {
            EmbeddedFilter::All
        } else {
            EmbeddedFilter::Pending
        };

        let documents = self.documents.list_documents(tenant, selection).await?;
        if documents.is_empty() {
            debug!(org_id = %tenant.org_id, user_id = %tenant.user_id, "no documents to vectorize");
            return Ok(VectorizationReport::default());
        }

        info!(
            org_id = %tenant.org_id,
            user_id = %tenant.user_id,
            count = documents.len(),
            force_reindex,
            "starting vectorization"
        );

        let target = namespace(tenant);
        let mut report = VectorizationReport::default();

        for (batch_number, batch) in documents.chunks(batch_size.max(1)).enumerate() {
            for document in batch {
                match self.vectorize_document(&target, document).await {
                    Ok(0) => {}
                    Ok(chunk_count) => {
                        report.vectorized_count += 1;
                        report.total_chunks += chunk_count;
                    }
                    Err(error) => {
                        warn!(document_id = %document.document_id, %error, "vectorization error");
                        push_error(
                            &mut report.errors,
                            format!("document {}: {error}", document.document_id),
                            self.max_errors,
                        );
                    }
                }
            }

            info!(
                batch = batch_number + 1,
                vectorized = report.vectorized_count,
                chunks = report.total_chunks,
                "vectorized batch"
            );
        }

        Ok(report)
    }

    /// Chunk, embed, upsert and mark one document. Returns the number of
    /// chunks written; zero means the document had nothing to embed.
    async fn vectorize_document(&self, target: &str, document: &Document) -> Result<usize> {
        if document.text_content.trim().is_empty() {
            debug!(document_id = %document.document_id, "skipping document with no text");
            return Ok(0);
        }

        let chunks = chunk_text(
            &document.text_content,
            &self.chunking,
            self.token_counter.as_ref(),
        );
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.chunk_text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let records = build_vector_records(document, &chunks, embeddings);
        self.index.upsert(target, &records).await?;

        self.documents
            .mark_embedded(&document.document_id, Utc::now())
            .await?;

        Ok(records.len())
    }

    pub async fn vectorization_status(&self, tenant: &TenantId) -> Result<VectorizationStatus> {
        vectorization_status(&self.documents, &self.index, tenant).await
    }
}

/// Build the upsert records for one document. Vector ids are
/// `{document_id}_chunk_{index}` so re-ingestion overwrites instead of
/// duplicating.
pub fn build_vector_records(
    document: &Document,
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
) -> Vec<VectorRecord> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            let mut metadata = document.metadata();
            if let Value::Object(map) = &mut metadata {
                map.insert("chunk_index".to_string(), json!(chunk.chunk_index));
                map.insert("chunk_token_count".to_string(), json!(chunk.token_count));
                map.insert(
                    "text_preview".to_string(),
                    json!(text_preview(&chunk.chunk_text)),
                );
            }

            VectorRecord {
                vector_id: format!("{}_chunk_{}", document.document_id, chunk.chunk_index),
                embedding,
                metadata,
            }
        })
        .collect()
}

fn text_preview(text: &str) -> String {
    text.char_indices()
        .nth(200)
        .map(|(boundary, _)| text[..boundary].to_string())
        .unwrap_or_else(|| text.to_string())
}

fn push_error(errors: &mut Vec<String>, message: String, cap: usize) {
    if errors.len() < cap {
        errors.push(message);
    } else if errors.len() == cap {
        errors.push("further errors truncated".to_string());
    }
}

/// Combine document-store counts with index stats. A stats failure degrades
/// to a zero vector count rather than failing the status call.
pub async fn vectorization_status<D, S>(
    documents: &D,
    index: &IndexGateway<S>,
    tenant: &TenantId,
) -> Result<VectorizationStatus>
where
    D: DocumentStore,
    S: VectorIndexService,
{
    let total = documents.count_documents(tenant, EmbeddedFilter::All).await?;
    let embedded = documents
        .count_documents(tenant, EmbeddedFilter::Embedded)
        .await?;

    let vector_count = match index.namespace_stats(&namespace(tenant)).await {
        Ok(stats) => stats.vector_count,
        Err(error) => {
            warn!(%error, "could not read index stats");
            0
        }
    };

    Ok(VectorizationStatus {
        total,
        embedded,
        pending: total.saturating_sub(embedded),
        vector_count,
        ready: embedded > 0,
        completion_percentage: if total > 0 {
            (embedded as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        },
    })
}

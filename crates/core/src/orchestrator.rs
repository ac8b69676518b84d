use crate::audit::{AuditEvent, AuditSink};
use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::filters::namespace;
use crate::index::IndexGateway;
use crate::ingest::vectorization_status;
use crate::llm::CompletionClient;
use crate::models::{
    Answer, AnswerMetadata, Confidence, QueryFilters, RagConfig, TenantId,
};
use crate::pipeline::GroundedAnswerPipeline;
use crate::retrieval;
use crate::traits::{DocumentStore, VectorIndexService};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Top-level query entry point: embed, retrieve, branch on insufficient
/// evidence, run the grounded-answer pipeline, audit, and always return a
/// well-formed [`Answer`] — never an unhandled fault.
pub struct QueryOrchestrator<D, E, S, L, A> {
    documents: D,
    embedder: E,
    gateway: IndexGateway<S>,
    pipeline: GroundedAnswerPipeline<L>,
    audit: A,
    config: RagConfig,
}

impl<D, E, S, L, A> QueryOrchestrator<D, E, S, L, A>
where
    D: DocumentStore,
    E: Embedder,
    S: VectorIndexService,
    L: CompletionClient,
    A: AuditSink,
{
    pub fn new(
        documents: D,
        embedder: E,
        gateway: IndexGateway<S>,
        pipeline: GroundedAnswerPipeline<L>,
        audit: A,
        config: RagConfig,
    ) -> Self {
        Self {
            documents,
            embedder,
            gateway,
            pipeline,
            audit,
            config,
        }
    }

    pub async fn answer_query(
        &self,
        tenant: &TenantId,
        query_text: &str,
        filters: &QueryFilters,
        request_id: Option<String>,
    ) -> Answer {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let started = Instant::now();

        info!(
            %request_id,
            org_id = %tenant.org_id,
            user_id = %tenant.user_id,
            query = %truncate(query_text, 100),
            "rag query started"
        );

        match self
            .try_answer(tenant, query_text, filters, &request_id, started)
            .await
        {
            Ok(answer) => {
                info!(
                    %request_id,
                    processing_time_ms = answer.metadata.processing_time_ms,
                    "rag query completed"
                );
                answer
            }
            Err(query_error) => {
                error!(%request_id, error = %query_error, "rag query failed");
                self.fallback_answer(query_text, filters, &request_id, started)
            }
        }
    }

    async fn try_answer(
        &self,
        tenant: &TenantId,
        query_text: &str,
        filters: &QueryFilters,
        request_id: &str,
        started: Instant,
    ) -> Result<Answer, QueryError> {
        let query_vector = self.embedder.embed_one(query_text).await?;

        let fragments = retrieval::retrieve(
            &self.gateway,
            tenant,
            &query_vector,
            filters,
            self.config.max_retrieval_results,
        )
        .await?;

        if fragments.is_empty() {
            // Distinguish "nothing embedded yet" from "no match" instead of
            // guessing; neither invokes the generation pipeline.
            let status = vectorization_status(&self.documents, &self.gateway, tenant).await?;
            let answer = if status.embedded == 0 {
                self.insufficient_evidence_answer(
                    NOT_VECTORIZED_TEXT,
                    "no documents have been vectorized for this tenant yet",
                    query_text,
                    filters,
                    request_id,
                    started,
                )
            } else {
                self.insufficient_evidence_answer(
                    NO_MATCH_TEXT,
                    "no email passed the relevance floor for this query and filters",
                    query_text,
                    filters,
                    request_id,
                    started,
                )
            };
            return Ok(answer);
        }

        let retrieval_count = fragments.len();
        let outcome = self.pipeline.run(query_text, fragments).await?;

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let answer = Answer {
            answer_text: outcome.draft.answer_text,
            sources: outcome.draft.sources,
            answer_complete: outcome.draft.answer_complete,
            confidence: outcome.draft.confidence,
            limitations: outcome.draft.limitations,
            metadata: AnswerMetadata {
                request_id: request_id.to_string(),
                query: query_text.to_string(),
                filters: filters.clone(),
                retrieval_count,
                processing_time_ms,
                stage_timings: Some(outcome.timings),
            },
        };

        self.audit.record(&AuditEvent::rag_query(
            request_id,
            tenant,
            query_text,
            filters,
            retrieval_count,
            processing_time_ms,
        ));

        Ok(answer)
    }

    fn insufficient_evidence_answer(
        &self,
        answer_text: &str,
        limitation: &str,
        query_text: &str,
        filters: &QueryFilters,
        request_id: &str,
        started: Instant,
    ) -> Answer {
        Answer {
            answer_text: answer_text.to_string(),
            sources: Vec::new(),
            answer_complete: false,
            confidence: Confidence::Low,
            limitations: vec![limitation.to_string()],
            metadata: AnswerMetadata {
                request_id: request_id.to_string(),
                query: query_text.to_string(),
                filters: filters.clone(),
                retrieval_count: 0,
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                stage_timings: None,
            },
        }
    }

    fn fallback_answer(
        &self,
        query_text: &str,
        filters: &QueryFilters,
        request_id: &str,
        started: Instant,
    ) -> Answer {
        Answer {
            answer_text: FALLBACK_TEXT.to_string(),
            sources: Vec::new(),
            answer_complete: false,
            confidence: Confidence::Low,
            limitations: vec!["the query could not be processed".to_string()],
            metadata: AnswerMetadata {
                request_id: request_id.to_string(),
                query: query_text.to_string(),
                filters: filters.clone(),
                retrieval_count: 0,
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                stage_timings: None,
            },
        }
    }

    /// Full tenant data erasure in the vector index.
    pub async fn erase_tenant(&self, tenant: &TenantId) -> Result<(), QueryError> {
        let target = namespace(tenant);
        self.gateway.delete_namespace(&target).await?;
        self.audit.record(&AuditEvent::TenantErasure {
            org_id: tenant.org_id.clone(),
            user_id: tenant.user_id.clone(),
            namespace: target,
        });
        Ok(())
    }
}

const NOT_VECTORIZED_TEXT: &str = "Your emails haven't been vectorized yet. \
Run vectorization first to enable semantic search.";

const NO_MATCH_TEXT: &str = "I couldn't find any emails matching your query. \
Try rephrasing your question or broadening your search criteria.";

const FALLBACK_TEXT: &str = "I encountered an error while processing your \
query. Please try again or contact support if the issue persists.";

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

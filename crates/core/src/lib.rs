pub mod audit;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod filters;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use chunking::{chunk_text, ChunkingConfig, HeuristicTokenCounter, TokenCounter};
pub use embeddings::{Embedder, HashingEmbedder, HttpEmbedder};
pub use error::{
    ChunkingError, EmbeddingError, IndexError, IngestError, LlmError, PipelineError, QueryError,
    StoreError,
};
pub use filters::{namespace, validate_filter, TenantFilter};
pub use index::IndexGateway;
pub use ingest::{build_vector_records, vectorization_status, IngestionCoordinator};
pub use llm::{parse_json_response, CompletionClient, HttpCompletionClient, StagePrompt};
pub use models::{
    Answer, AnswerMetadata, AnswerSource, Chunk, Confidence, Document, NamespaceStats,
    QueryFilters, RagConfig, RetrievedFragment, StageKind, StageTimings, TenantId, VectorRecord,
    VectorizationReport, VectorizationStatus,
};
pub use orchestrator::QueryOrchestrator;
pub use pipeline::{GroundedAnswerPipeline, PipelineContext, PipelineOutcome};
pub use retrieval::retrieve;
pub use stores::PineconeStore;
pub use traits::{DocumentStore, EmbeddedFilter, VectorIndexService};

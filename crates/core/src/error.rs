use crate::models::StageKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),

    #[error("token counting failed: {0}")]
    TokenCount(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request failed after {attempts} attempts: {details}")]
    Upstream { attempts: u32, details: String },

    #[error("invalid response from embedding service: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("namespace is required for tenant isolation")]
    MissingNamespace,

    #[error("filter is missing the tenant pair")]
    MissingTenantFilter,

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion request failed after {attempts} attempts: {details}")]
    Upstream { attempts: u32, details: String },

    #[error("completion service returned malformed output: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: StageKind,
        #[source]
        source: LlmError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store error: {0}")]
    Backend(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Internal query-path error. Never escapes the orchestrator: every variant
/// terminates in a safe fallback [`Answer`](crate::models::Answer).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

mod mailbox;

use chrono::Utc;
use clap::{Parser, Subcommand};
use mail_rag_core::{
    Embedder, GroundedAnswerPipeline, HashingEmbedder, HttpCompletionClient, HttpEmbedder,
    IndexGateway, IngestionCoordinator, PineconeStore, QueryFilters, QueryOrchestrator, RagConfig,
    TenantId, TracingAuditSink,
};
use mailbox::JsonMailboxStore;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mail-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Organization id (tenant isolation)
    #[arg(long)]
    org_id: String,

    /// User id (tenant isolation)
    #[arg(long)]
    user_id: String,

    /// Mailbox export file (JSON array of emails)
    #[arg(long, default_value = "mailbox.json")]
    mailbox: String,

    /// Vector index base URL
    #[arg(long, default_value = "http://localhost:6333")]
    index_url: String,

    /// Vector index API key
    #[arg(long, env = "MAILRAG_INDEX_API_KEY", default_value = "")]
    index_api_key: String,

    /// Embedding service URL
    #[arg(long, default_value = "https://api.openai.com/v1/embeddings")]
    embedding_url: String,

    /// Embedding service API key
    #[arg(long, env = "MAILRAG_EMBEDDING_API_KEY", default_value = "")]
    embedding_api_key: String,

    /// Embedding model name
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Embedding dimension
    #[arg(long, default_value = "1536")]
    dimension: usize,

    /// Use the deterministic offline embedder instead of the HTTP service
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,

    /// Completion service URL
    #[arg(long, default_value = "https://api.openai.com/v1/chat/completions")]
    llm_url: String,

    /// Completion service API key
    #[arg(long, env = "MAILRAG_LLM_API_KEY", default_value = "")]
    llm_api_key: String,

    /// Completion model name
    #[arg(long, default_value = "gpt-4o-mini")]
    llm_model: String,

    /// Minimum relevance score for retrieved fragments
    #[arg(long, default_value = "0.7")]
    min_relevance: f32,

    /// Disable PII redaction in answers
    #[arg(long, default_value_t = false)]
    no_redaction: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index the mailbox into the tenant namespace.
    Vectorize {
        /// Documents per processing batch.
        #[arg(long, default_value = "50")]
        batch_size: usize,
        /// Re-embed documents that are already marked embedded.
        #[arg(long, default_value_t = false)]
        force_reindex: bool,
    },
    /// Ask a question about the mailbox and get a grounded, cited answer.
    Query {
        /// The natural-language question.
        #[arg(long)]
        query: String,
        /// Only consider emails sent on or after this date (YYYY-MM-DD).
        #[arg(long)]
        date_from: Option<String>,
        /// Only consider emails sent on or before this date (YYYY-MM-DD).
        #[arg(long)]
        date_to: Option<String>,
        /// Only consider emails from this sender.
        #[arg(long)]
        sender: Option<String>,
    },
    /// Show vectorization progress for the tenant.
    Status,
    /// Delete every vector in the tenant namespace.
    Erase {
        /// Required confirmation flag.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let tenant = TenantId::new(&cli.org_id, &cli.user_id);

    let config = RagConfig {
        embedding_dimension: cli.dimension,
        min_relevance_score: cli.min_relevance,
        redaction_enabled: !cli.no_redaction,
        ..RagConfig::default()
    };

    let embedder: Box<dyn Embedder> = if cli.offline_embeddings {
        Box::new(HashingEmbedder {
            dimensions: config.embedding_dimension,
        })
    } else {
        Box::new(HttpEmbedder::new(
            &cli.embedding_url,
            &cli.embedding_api_key,
            &cli.embedding_model,
            config.embedding_dimension,
        ))
    };

    let store = JsonMailboxStore::load(std::path::Path::new(&cli.mailbox), &tenant)
        .map_err(|error| anyhow::anyhow!("cannot load mailbox {}: {error}", cli.mailbox))?;
    let index = PineconeStore::new(&cli.index_url, &cli.index_api_key)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let gateway = IndexGateway::new(index, &config);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        org_id = %tenant.org_id,
        user_id = %tenant.user_id,
        "mail-rag boot"
    );

    match cli.command {
        Command::Vectorize {
            batch_size,
            force_reindex,
        } => {
            let coordinator = IngestionCoordinator::new(store, embedder, gateway, &config);
            let report = coordinator
                .vectorize(&tenant, batch_size, force_reindex)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if !report.errors.is_empty() {
                warn!(error_count = report.errors.len(), "vectorization had errors");
                for error in &report.errors {
                    warn!(%error, "vectorization error");
                }
            }

            println!(
                "{} emails vectorized into {} chunks at {}",
                report.vectorized_count,
                report.total_chunks,
                Utc::now().to_rfc3339()
            );
            if !report.errors.is_empty() {
                println!("{} errors (see logs)", report.errors.len());
            }
        }
        Command::Query {
            query,
            date_from,
            date_to,
            sender,
        } => {
            let llm = HttpCompletionClient::new(&cli.llm_url, &cli.llm_api_key, &cli.llm_model);
            let orchestrator = QueryOrchestrator::new(
                store,
                embedder,
                gateway,
                GroundedAnswerPipeline::new(llm, &config),
                TracingAuditSink,
                config,
            );

            let filters = QueryFilters {
                date_from,
                date_to,
                sender,
            };
            let answer = orchestrator
                .answer_query(&tenant, &query, &filters, None)
                .await;

            println!("{}", answer.answer_text);
            println!();

            if !answer.sources.is_empty() {
                println!("sources:");
                for source in &answer.sources {
                    println!(
                        "  [{:.2}] {} — \"{}\" ({}, {})",
                        source.relevance, source.sender, source.subject, source.email_id,
                        source.date
                    );
                }
            }

            if !answer.limitations.is_empty() {
                println!("limitations:");
                for limitation in &answer.limitations {
                    println!("  - {limitation}");
                }
            }

            println!(
                "answer_complete={} confidence={:?} retrieved={} in {:.0}ms (request {})",
                answer.answer_complete,
                answer.confidence,
                answer.metadata.retrieval_count,
                answer.metadata.processing_time_ms,
                answer.metadata.request_id
            );
        }
        Command::Status => {
            let coordinator = IngestionCoordinator::new(store, embedder, gateway, &config);
            let status = coordinator
                .vectorization_status(&tenant)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "total={} embedded={} pending={} vectors={} ready={} ({:.1}%)",
                status.total,
                status.embedded,
                status.pending,
                status.vector_count,
                status.ready,
                status.completion_percentage
            );
        }
        Command::Erase { yes } => {
            if !yes {
                anyhow::bail!("refusing to erase tenant data without --yes");
            }

            let llm = HttpCompletionClient::new(&cli.llm_url, &cli.llm_api_key, &cli.llm_model);
            let orchestrator = QueryOrchestrator::new(
                store,
                embedder,
                gateway,
                GroundedAnswerPipeline::new(llm, &config),
                TracingAuditSink,
                config,
            );

            orchestrator
                .erase_tenant(&tenant)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!(
                "erased vector namespace for org={} user={}",
                tenant.org_id, tenant.user_id
            );
        }
    }

    Ok(())
}

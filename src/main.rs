//! # crawl-rag CLI
//!
//! Command-line entry point for the crawl-to-retrieval pipeline. Wraps the
//! same operations the HTTP control plane (`server.rs`) exposes as tool
//! routes, for local use without a running server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crawl_rag::config;
use crawl_rag::crawl::orchestrator::{self, IngestOptions};
use crawl_rag::crawl::fetch::FetchOptions;
use crawl_rag::crawl::strategy::CrawlOptions;
use crawl_rag::crawl;
use crawl_rag::embedding::{self, EmbeddingProvider};
use crawl_rag::graph_store::GraphStore;
use crawl_rag::migrate;
use crawl_rag::retrieval;
use crawl_rag::server;
use crawl_rag::sources;
use crawl_rag::validate;
use crawl_rag::vector_store::VectorStore;

#[derive(Parser)]
#[command(
    name = "crawlrag",
    about = "crawl-rag — a crawl-to-retrieval pipeline with graph-augmented RAG",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/crawlrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the vector store (and graph store, if enabled) schema
    Init,

    /// Start the HTTP control plane
    Serve,

    /// List known sources (`get_available_sources`)
    Sources,

    /// Crawl and ingest one or more URLs
    Crawl {
        #[command(subcommand)]
        mode: CrawlMode,
    },

    /// Run a retrieval query
    Query {
        #[command(subcommand)]
        mode: QueryMode,
    },

    /// Inspect the knowledge graph directly
    Graph {
        #[command(subcommand)]
        mode: GraphMode,
    },
}

#[derive(Subcommand)]
enum CrawlMode {
    /// `crawl_single_page`: one fetch, one document
    Single { url: String },

    /// `smart_crawl_url`: auto-select strategy by URL classification
    Smart {
        url: String,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        max_concurrent: Option<u32>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// `crawl_with_stealth_mode`: smart crawl via an undetected browser profile
    Stealth {
        url: String,
        #[arg(long)]
        wait_for_selector: Option<String>,
        #[arg(long)]
        extra_wait_ms: Option<u64>,
    },

    /// `crawl_with_multi_url_config`: per-URL-type optimized crawl of many URLs
    MultiUrl {
        urls: Vec<String>,
        #[arg(long)]
        max_concurrent: Option<u32>,
    },

    /// `crawl_with_memory_monitoring`: smart crawl with adaptive concurrency throttling
    MemoryMonitored {
        url: String,
        #[arg(long)]
        memory_threshold_mb: Option<u64>,
    },

    /// `crawl_with_graph_extraction`: dual-write ingest into vector + graph stores
    GraphExtraction {
        url: String,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum QueryMode {
    /// `perform_rag_query`: hybrid + rerank retrieval over document chunks
    Rag {
        query: String,
        #[arg(long)]
        source_filter: Option<String>,
        #[arg(long)]
        match_count: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        max_content_length: Option<usize>,
        #[arg(long)]
        include_full_content: Option<bool>,
        #[arg(long)]
        max_response_tokens: Option<usize>,
    },

    /// `search_code_examples`: the same retrieval pipeline over stored code examples
    Code {
        query: String,
        #[arg(long)]
        source_id: Option<String>,
        #[arg(long)]
        match_count: Option<u32>,
    },

    /// `graphrag_query`: retrieval enriched with graph context and an LLM answer
    Graphrag {
        query: String,
        #[arg(long)]
        use_graph_enrichment: Option<bool>,
        #[arg(long, default_value_t = 5)]
        max_entities: usize,
        #[arg(long)]
        source_filter: Option<String>,
        #[arg(long)]
        match_count: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        max_content_length: Option<usize>,
        #[arg(long)]
        include_full_content: Option<bool>,
        #[arg(long)]
        max_response_tokens: Option<usize>,
    },
}

#[derive(Subcommand)]
enum GraphMode {
    /// `query_document_graph`: pass-through read query
    Cypher { cypher_query: String },

    /// `get_entity_context`: one entity's neighborhood
    Entity {
        entity_name: String,
        #[arg(long, default_value_t = 2)]
        max_hops: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(config::load_config(&cli.config)?);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            if cfg.graph.enabled {
                let graph = GraphStore::connect(&cfg.graph).await?;
                graph.migrate().await?;
            }
            println!("Vector store (and graph store, if enabled) schema initialized.");
        }

        Commands::Serve => {
            let vector_store = VectorStore::connect(&cfg).await?;
            let graph_store = connect_graph_if_enabled(&cfg).await?;
            let provider: Arc<dyn EmbeddingProvider> = embedding::create_provider(&cfg.embedding)?.into();
            server::run_server(cfg, vector_store, graph_store, provider).await?;
        }

        Commands::Sources => {
            let vector_store = VectorStore::connect(&cfg).await?;
            let envelope = sources::get_available_sources(&vector_store).await;
            print_json(&envelope);
        }

        Commands::Crawl { mode } => run_crawl(&cfg, mode).await?,

        Commands::Query { mode } => run_query(&cfg, mode).await?,

        Commands::Graph { mode } => run_graph(&cfg, mode).await?,
    }

    Ok(())
}

async fn connect_graph_if_enabled(cfg: &config::Config) -> anyhow::Result<Option<GraphStore>> {
    if !cfg.graph.enabled {
        return Ok(None);
    }
    let graph = GraphStore::connect(&cfg.graph).await?;
    graph.migrate().await?;
    Ok(Some(graph))
}

fn ingest_options(cfg: &config::Config, chunk_size: usize) -> IngestOptions {
    IngestOptions {
        chunk_size,
        use_contextual_embeddings: cfg.features.use_contextual_embeddings,
        extract_code: cfg.features.use_agentic_rag,
        extract_graph: cfg.features.use_knowledge_graph,
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

fn crawl_envelope(
    result: &crawl::strategy::CrawlResult,
    summary: &orchestrator::IngestSummary,
) -> serde_json::Value {
    serde_json::json!({
        "success": result.success,
        "url": result.url,
        "pages_crawled": result.pages_crawled,
        "strategy_metadata": result.metadata,
        "chunks_stored": summary.chunks_stored,
        "code_examples_stored": summary.code_examples_stored,
        "sources_updated": summary.sources_updated,
        "entities_stored": summary.entities_stored,
        "relationships_stored": summary.relationships_stored,
        "failed_urls": summary.failed_urls,
    })
}

async fn run_crawl(cfg: &config::Config, mode: CrawlMode) -> anyhow::Result<()> {
    let vector_store = VectorStore::connect(cfg).await?;
    let graph_store = connect_graph_if_enabled(cfg).await?;
    let provider: Arc<dyn EmbeddingProvider> = embedding::create_provider(&cfg.embedding)?.into();
    let fetcher = orchestrator::default_fetcher(cfg)?;

    match mode {
        CrawlMode::Single { url } => {
            if !validate::is_safe_for_storage(&url) {
                anyhow::bail!("url failed safety validation: {url}");
            }
            let options = ingest_options(cfg, cfg.chunking.max_tokens);
            let (result, summary) = orchestrator::crawl_single_page(
                fetcher.as_ref(),
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &url,
                &options,
            )
            .await;
            print_json(&crawl_envelope(&result, &summary));
        }

        CrawlMode::Smart {
            url,
            max_depth,
            max_concurrent,
            chunk_size,
        } => {
            if !validate::is_safe_for_storage(&url) {
                anyhow::bail!("url failed safety validation: {url}");
            }
            let max_depth = validate::validate_depth(max_depth.unwrap_or(cfg.crawl.default_max_depth))?;
            let max_concurrent =
                validate::validate_concurrent_limit(max_concurrent.unwrap_or(cfg.crawl.default_max_concurrent))?;
            let chunk_size = validate::validate_chunk_size(chunk_size.unwrap_or(cfg.chunking.max_tokens))?;

            let crawl_options = CrawlOptions {
                max_depth,
                max_concurrent: max_concurrent as usize,
                fetch: FetchOptions::default(),
            };
            let options = ingest_options(cfg, chunk_size);
            let (result, summary) = orchestrator::smart_crawl_url(
                fetcher.as_ref(),
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &url,
                &crawl_options,
                &options,
            )
            .await;
            print_json(&crawl_envelope(&result, &summary));
        }

        CrawlMode::Stealth {
            url,
            wait_for_selector,
            extra_wait_ms,
        } => {
            if !validate::is_safe_for_storage(&url) {
                anyhow::bail!("url failed safety validation: {url}");
            }
            let options = ingest_options(cfg, cfg.chunking.max_tokens);
            let (result, summary) = orchestrator::crawl_with_stealth_mode(
                fetcher.as_ref(),
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &url,
                wait_for_selector,
                extra_wait_ms,
                &options,
            )
            .await;
            print_json(&crawl_envelope(&result, &summary));
        }

        CrawlMode::MultiUrl { urls, max_concurrent } => {
            for url in &urls {
                if !validate::is_safe_for_storage(url) {
                    anyhow::bail!("url failed safety validation: {url}");
                }
            }
            let max_concurrent =
                validate::validate_concurrent_limit(max_concurrent.unwrap_or(cfg.crawl.default_max_concurrent))?;
            let options = ingest_options(cfg, cfg.chunking.max_tokens);
            let results = orchestrator::crawl_with_multi_url_config(
                fetcher.as_ref(),
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &urls,
                max_concurrent as usize,
                &options,
            )
            .await;
            let by_url: Vec<serde_json::Value> = results
                .into_iter()
                .map(|(url, url_type, result, summary)| {
                    let mut entry = crawl_envelope(&result, &summary);
                    entry["url"] = serde_json::json!(url);
                    entry["url_type"] = serde_json::json!(url_type);
                    entry
                })
                .collect();
            print_json(&serde_json::json!({ "success": true, "results": by_url }));
        }

        CrawlMode::MemoryMonitored {
            url,
            memory_threshold_mb,
        } => {
            if !validate::is_safe_for_storage(&url) {
                anyhow::bail!("url failed safety validation: {url}");
            }
            let threshold = memory_threshold_mb.unwrap_or(cfg.crawl.memory_threshold_mb);
            let options = ingest_options(cfg, cfg.chunking.max_tokens);
            let (result, summary, report) = orchestrator::crawl_with_memory_monitoring(
                fetcher.as_ref(),
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &url,
                threshold,
                &options,
            )
            .await;
            let mut envelope = crawl_envelope(&result, &summary);
            envelope["memory_report"] = serde_json::json!(report);
            print_json(&envelope);
        }

        CrawlMode::GraphExtraction { url, chunk_size } => {
            if !validate::is_safe_for_storage(&url) {
                anyhow::bail!("url failed safety validation: {url}");
            }
            if graph_store.is_none() {
                anyhow::bail!("graph store is not configured; set [graph].enabled = true");
            }
            let chunk_size = validate::validate_chunk_size(chunk_size.unwrap_or(cfg.chunking.max_tokens))?;
            let (result, summary) = orchestrator::crawl_with_graph_extraction(
                fetcher.as_ref(),
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &url,
                chunk_size,
            )
            .await;
            print_json(&crawl_envelope(&result, &summary));
        }
    }

    Ok(())
}

async fn run_query(cfg: &config::Config, mode: QueryMode) -> anyhow::Result<()> {
    let vector_store = VectorStore::connect(cfg).await?;
    let provider: Arc<dyn EmbeddingProvider> = embedding::create_provider(&cfg.embedding)?.into();

    match mode {
        QueryMode::Rag {
            query,
            source_filter,
            match_count,
            offset,
            max_content_length,
            include_full_content,
            max_response_tokens,
        } => {
            let result = retrieval::rag_query(
                &vector_store,
                provider.as_ref(),
                cfg,
                &query,
                source_filter.as_deref(),
                match_count.unwrap_or(cfg.retrieval.default_match_count),
                offset,
                max_content_length.unwrap_or(cfg.retrieval.default_max_content_length),
                include_full_content.unwrap_or(true),
                max_response_tokens.unwrap_or(cfg.retrieval.default_max_response_tokens),
            )
            .await;
            print_json(&result);
        }

        QueryMode::Code {
            query,
            source_id,
            match_count,
        } => {
            let result = retrieval::search_code_examples(
                &vector_store,
                provider.as_ref(),
                cfg,
                &query,
                source_id.as_deref(),
                match_count.unwrap_or(cfg.retrieval.default_match_count),
            )
            .await;
            print_json(&result);
        }

        QueryMode::Graphrag {
            query,
            use_graph_enrichment,
            max_entities,
            source_filter,
            match_count,
            offset,
            max_content_length,
            include_full_content,
            max_response_tokens,
        } => {
            let graph_store = connect_graph_if_enabled(cfg).await?;
            let result = retrieval::graphrag_query(
                &vector_store,
                graph_store.as_ref(),
                provider.as_ref(),
                cfg,
                &query,
                use_graph_enrichment.unwrap_or(cfg.features.use_graphrag),
                max_entities,
                source_filter.as_deref(),
                match_count.unwrap_or(cfg.retrieval.default_match_count),
                offset,
                max_content_length.unwrap_or(cfg.retrieval.default_max_content_length),
                include_full_content.unwrap_or(true),
                max_response_tokens.unwrap_or(cfg.retrieval.default_max_response_tokens),
            )
            .await;
            print_json(&result);
        }
    }

    Ok(())
}

async fn run_graph(cfg: &config::Config, mode: GraphMode) -> anyhow::Result<()> {
    if !cfg.graph.enabled {
        anyhow::bail!("graph store is not configured; set [graph].enabled = true");
    }
    let graph = GraphStore::connect(&cfg.graph).await?;

    match mode {
        GraphMode::Cypher { cypher_query } => match graph.run_read_query(&cypher_query).await {
            Ok(rows) => print_json(&serde_json::json!({ "success": true, "rows": rows })),
            Err(e) => print_json(&serde_json::json!({ "success": false, "error": e.to_string() })),
        },
        GraphMode::Entity { entity_name, max_hops } => {
            match graph.entity_context(&entity_name, max_hops, 20).await {
                Ok(Some(context)) => print_json(&serde_json::json!({ "success": true, "entity": context })),
                Ok(None) => print_json(
                    &serde_json::json!({ "success": false, "error": format!("entity not found: {entity_name}") }),
                ),
                Err(e) => print_json(&serde_json::json!({ "success": false, "error": e.to_string() })),
            }
        }
    }

    Ok(())
}

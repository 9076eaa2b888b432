//! HTTP control plane.
//!
//! Exposes every tool in the external interface as one `POST`/`GET` route,
//! matching the table in `spec.md` §6. Routing and envelope encoding only —
//! no business logic lives here; each handler deserializes its request,
//! calls straight into `retrieval`/`sources`/`crawl::orchestrator`/
//! `graph_store`, and returns the tool's JSON envelope as-is (`success:
//! true|false` plus tool-specific fields, per §6).
//!
//! # Endpoints
//!
//! | Method | Path |
//! |--------|------|
//! | `POST` | `/tools/crawl_single_page` |
//! | `POST` | `/tools/smart_crawl_url` |
//! | `POST` | `/tools/crawl_with_stealth_mode` |
//! | `POST` | `/tools/crawl_with_multi_url_config` |
//! | `POST` | `/tools/crawl_with_memory_monitoring` |
//! | `GET`  | `/tools/get_available_sources` |
//! | `POST` | `/tools/perform_rag_query` |
//! | `POST` | `/tools/search_code_examples` |
//! | `POST` | `/tools/crawl_with_graph_extraction` |
//! | `POST` | `/tools/graphrag_query` |
//! | `POST` | `/tools/query_document_graph` |
//! | `POST` | `/tools/get_entity_context` |
//! | `GET`  | `/health` |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, to support browser-based
//! and cross-origin MCP-style tool callers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::crawl::fetch::PageFetcher;
use crate::crawl::orchestrator::{self, IngestOptions};
use crate::crawl::strategy::{CrawlOptions, FetchOptions};
use crate::embedding::EmbeddingProvider;
use crate::graph_store::GraphStore;
use crate::retrieval;
use crate::sources;
use crate::validate;
use crate::vector_store::VectorStore;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    vector_store: Arc<VectorStore>,
    graph_store: Arc<Option<GraphStore>>,
    provider: Arc<dyn EmbeddingProvider>,
    fetcher: Arc<dyn PageFetcher>,
}

/// Starts the control-plane HTTP server. Binds to `[server].bind` and
/// registers every tool route. Runs until the process is terminated.
pub async fn run_server(
    config: Arc<Config>,
    vector_store: VectorStore,
    graph_store: Option<GraphStore>,
    provider: Arc<dyn EmbeddingProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let fetcher = orchestrator::default_fetcher(&config)?;

    let state = AppState {
        config,
        vector_store: Arc::new(vector_store),
        graph_store: Arc::new(graph_store),
        provider,
        fetcher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/crawl_single_page", post(handle_crawl_single_page))
        .route("/tools/smart_crawl_url", post(handle_smart_crawl_url))
        .route("/tools/crawl_with_stealth_mode", post(handle_crawl_with_stealth_mode))
        .route("/tools/crawl_with_multi_url_config", post(handle_crawl_with_multi_url_config))
        .route("/tools/crawl_with_memory_monitoring", post(handle_crawl_with_memory_monitoring))
        .route("/tools/get_available_sources", get(handle_get_available_sources))
        .route("/tools/perform_rag_query", post(handle_perform_rag_query))
        .route("/tools/search_code_examples", post(handle_search_code_examples))
        .route("/tools/crawl_with_graph_extraction", post(handle_crawl_with_graph_extraction))
        .route("/tools/graphrag_query", post(handle_graphrag_query))
        .route("/tools/query_document_graph", post(handle_query_document_graph))
        .route("/tools/get_entity_context", post(handle_get_entity_context))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("crawl-rag control plane listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// A request body failed to parse or a parameter failed range validation —
/// the only case this layer turns into an HTTP-level error rather than an
/// in-band `{success: false}` envelope, since the tool was never reached.
struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "success": false, "error": self.1 }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError(StatusCode::BAD_REQUEST, message.into())
}

fn ingest_options(config: &Config, chunk_size: usize) -> IngestOptions {
    IngestOptions {
        chunk_size,
        use_contextual_embeddings: config.features.use_contextual_embeddings,
        extract_code: config.features.use_agentic_rag,
        extract_graph: config.features.use_knowledge_graph,
    }
}

fn crawl_envelope(
    result: &crate::crawl::strategy::CrawlResult,
    summary: &orchestrator::IngestSummary,
) -> Value {
    json!({
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

// ============ POST /tools/crawl_single_page ============

#[derive(Deserialize)]
struct CrawlSinglePageRequest {
    url: String,
}

async fn handle_crawl_single_page(
    State(state): State<AppState>,
    Json(req): Json<CrawlSinglePageRequest>,
) -> Result<Json<Value>, AppError> {
    if !validate::is_safe_for_storage(&req.url) {
        return Err(bad_request("url failed safety validation"));
    }
    let options = ingest_options(&state.config, state.config.chunking.max_tokens);
    let (result, summary) = orchestrator::crawl_single_page(
        state.fetcher.as_ref(),
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.url,
        &options,
    )
    .await;
    Ok(Json(crawl_envelope(&result, &summary)))
}

// ============ POST /tools/smart_crawl_url ============

#[derive(Deserialize)]
struct SmartCrawlRequest {
    url: String,
    max_depth: Option<u32>,
    max_concurrent: Option<u32>,
    chunk_size: Option<usize>,
}

async fn handle_smart_crawl_url(
    State(state): State<AppState>,
    Json(req): Json<SmartCrawlRequest>,
) -> Result<Json<Value>, AppError> {
    if !validate::is_safe_for_storage(&req.url) {
        return Err(bad_request("url failed safety validation"));
    }
    let max_depth = validate::validate_depth(req.max_depth.unwrap_or(state.config.crawl.default_max_depth))
        .map_err(|e| bad_request(e.to_string()))?;
    let max_concurrent = validate::validate_concurrent_limit(
        req.max_concurrent.unwrap_or(state.config.crawl.default_max_concurrent),
    )
    .map_err(|e| bad_request(e.to_string()))?;
    let chunk_size = validate::validate_chunk_size(req.chunk_size.unwrap_or(state.config.chunking.max_tokens))
        .map_err(|e| bad_request(e.to_string()))?;

    let crawl_options = CrawlOptions {
        max_depth,
        max_concurrent: max_concurrent as usize,
        fetch: FetchOptions::default(),
    };
    let options = ingest_options(&state.config, chunk_size);
    let (result, summary) = orchestrator::smart_crawl_url(
        state.fetcher.as_ref(),
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.url,
        &crawl_options,
        &options,
    )
    .await;
    Ok(Json(crawl_envelope(&result, &summary)))
}

// ============ POST /tools/crawl_with_stealth_mode ============

#[derive(Deserialize)]
struct StealthCrawlRequest {
    url: String,
    wait_for_selector: Option<String>,
    extra_wait_ms: Option<u64>,
}

async fn handle_crawl_with_stealth_mode(
    State(state): State<AppState>,
    Json(req): Json<StealthCrawlRequest>,
) -> Result<Json<Value>, AppError> {
    if !validate::is_safe_for_storage(&req.url) {
        return Err(bad_request("url failed safety validation"));
    }
    let options = ingest_options(&state.config, state.config.chunking.max_tokens);
    let (result, summary) = orchestrator::crawl_with_stealth_mode(
        state.fetcher.as_ref(),
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.url,
        req.wait_for_selector,
        req.extra_wait_ms,
        &options,
    )
    .await;
    Ok(Json(crawl_envelope(&result, &summary)))
}

// ============ POST /tools/crawl_with_multi_url_config ============

#[derive(Deserialize)]
struct MultiUrlRequest {
    urls_json: Vec<String>,
    max_concurrent: Option<u32>,
}

async fn handle_crawl_with_multi_url_config(
    State(state): State<AppState>,
    Json(req): Json<MultiUrlRequest>,
) -> Result<Json<Value>, AppError> {
    for url in &req.urls_json {
        if !validate::is_safe_for_storage(url) {
            return Err(bad_request(format!("url failed safety validation: {url}")));
        }
    }
    let max_concurrent = validate::validate_concurrent_limit(
        req.max_concurrent.unwrap_or(state.config.crawl.default_max_concurrent),
    )
    .map_err(|e| bad_request(e.to_string()))?;

    let options = ingest_options(&state.config, state.config.chunking.max_tokens);
    let results = orchestrator::crawl_with_multi_url_config(
        state.fetcher.as_ref(),
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.urls_json,
        max_concurrent as usize,
        &options,
    )
    .await;

    let by_url: Vec<Value> = results
        .into_iter()
        .map(|(url, url_type, result, summary)| {
            let mut entry = crawl_envelope(&result, &summary);
            entry["url"] = json!(url);
            entry["url_type"] = json!(url_type);
            entry
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "results": by_url,
    })))
}

// ============ POST /tools/crawl_with_memory_monitoring ============

#[derive(Deserialize)]
struct MemoryMonitoringRequest {
    url: String,
    memory_threshold_mb: Option<u64>,
}

async fn handle_crawl_with_memory_monitoring(
    State(state): State<AppState>,
    Json(req): Json<MemoryMonitoringRequest>,
) -> Result<Json<Value>, AppError> {
    if !validate::is_safe_for_storage(&req.url) {
        return Err(bad_request("url failed safety validation"));
    }
    let threshold = req.memory_threshold_mb.unwrap_or(state.config.crawl.memory_threshold_mb);
    let options = ingest_options(&state.config, state.config.chunking.max_tokens);
    let (result, summary, report) = orchestrator::crawl_with_memory_monitoring(
        state.fetcher.as_ref(),
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.url,
        threshold,
        &options,
    )
    .await;

    let mut envelope = crawl_envelope(&result, &summary);
    envelope["memory_report"] = json!(report);
    Ok(Json(envelope))
}

// ============ GET /tools/get_available_sources ============

async fn handle_get_available_sources(State(state): State<AppState>) -> Json<Value> {
    Json(sources::get_available_sources(&state.vector_store).await)
}

// ============ POST /tools/perform_rag_query ============

#[derive(Deserialize)]
struct RagQueryRequest {
    query: String,
    source_filter: Option<String>,
    match_count: Option<u32>,
    offset: Option<usize>,
    max_content_length: Option<usize>,
    include_full_content: Option<bool>,
    max_response_tokens: Option<usize>,
}

async fn handle_perform_rag_query(
    State(state): State<AppState>,
    Json(req): Json<RagQueryRequest>,
) -> Json<Value> {
    let result = retrieval::rag_query(
        &state.vector_store,
        state.provider.as_ref(),
        &state.config,
        &req.query,
        req.source_filter.as_deref(),
        req.match_count.unwrap_or(state.config.retrieval.default_match_count),
        req.offset.unwrap_or(0),
        req.max_content_length.unwrap_or(state.config.retrieval.default_max_content_length),
        req.include_full_content.unwrap_or(true),
        req.max_response_tokens.unwrap_or(state.config.retrieval.default_max_response_tokens),
    )
    .await;
    Json(result)
}

// ============ POST /tools/search_code_examples ============

#[derive(Deserialize)]
struct SearchCodeRequest {
    query: String,
    source_id: Option<String>,
    match_count: Option<u32>,
}

async fn handle_search_code_examples(
    State(state): State<AppState>,
    Json(req): Json<SearchCodeRequest>,
) -> Json<Value> {
    let result = retrieval::search_code_examples(
        &state.vector_store,
        state.provider.as_ref(),
        &state.config,
        &req.query,
        req.source_id.as_deref(),
        req.match_count.unwrap_or(state.config.retrieval.default_match_count),
    )
    .await;
    Json(result)
}

// ============ POST /tools/crawl_with_graph_extraction ============

#[derive(Deserialize)]
struct GraphExtractionRequest {
    url: String,
    extract_entities: Option<bool>,
    extract_relationships: Option<bool>,
    chunk_size: Option<usize>,
}

async fn handle_crawl_with_graph_extraction(
    State(state): State<AppState>,
    Json(req): Json<GraphExtractionRequest>,
) -> Result<Json<Value>, AppError> {
    if !validate::is_safe_for_storage(&req.url) {
        return Err(bad_request("url failed safety validation"));
    }
    if state.graph_store.is_none() {
        return Ok(Json(json!({
            "success": false,
            "error": "graph store is not configured; set [graph].enabled = true",
        })));
    }
    // extract_entities/extract_relationships are accepted for contract
    // completeness; this implementation always extracts both together
    // when a graph path is requested (C8 has no independent toggle).
    let _ = (req.extract_entities, req.extract_relationships);

    let chunk_size = validate::validate_chunk_size(req.chunk_size.unwrap_or(state.config.chunking.max_tokens))
        .map_err(|e| bad_request(e.to_string()))?;

    let (result, summary) = orchestrator::crawl_with_graph_extraction(
        state.fetcher.as_ref(),
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.url,
        chunk_size,
    )
    .await;
    Ok(Json(crawl_envelope(&result, &summary)))
}

// ============ POST /tools/graphrag_query ============

#[derive(Deserialize)]
struct GraphragQueryRequest {
    query: String,
    use_graph_enrichment: Option<bool>,
    max_entities: Option<usize>,
    source_filter: Option<String>,
    match_count: Option<u32>,
    offset: Option<usize>,
    max_content_length: Option<usize>,
    include_full_content: Option<bool>,
    max_response_tokens: Option<usize>,
}

async fn handle_graphrag_query(
    State(state): State<AppState>,
    Json(req): Json<GraphragQueryRequest>,
) -> Json<Value> {
    let result = retrieval::graphrag_query(
        &state.vector_store,
        state.graph_store.as_ref().as_ref(),
        state.provider.as_ref(),
        &state.config,
        &req.query,
        req.use_graph_enrichment.unwrap_or(state.config.features.use_graphrag),
        req.max_entities.unwrap_or(5),
        req.source_filter.as_deref(),
        req.match_count.unwrap_or(state.config.retrieval.default_match_count),
        req.offset.unwrap_or(0),
        req.max_content_length.unwrap_or(state.config.retrieval.default_max_content_length),
        req.include_full_content.unwrap_or(true),
        req.max_response_tokens.unwrap_or(state.config.retrieval.default_max_response_tokens),
    )
    .await;
    Json(result)
}

// ============ POST /tools/query_document_graph ============

#[derive(Deserialize)]
struct QueryGraphRequest {
    cypher_query: String,
}

async fn handle_query_document_graph(
    State(state): State<AppState>,
    Json(req): Json<QueryGraphRequest>,
) -> Json<Value> {
    let Some(graph) = state.graph_store.as_ref().as_ref() else {
        return Json(json!({
            "success": false,
            "error": "graph store is not configured; set [graph].enabled = true",
        }));
    };
    match graph.run_read_query(&req.cypher_query).await {
        Ok(rows) => Json(json!({ "success": true, "rows": rows })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

// ============ POST /tools/get_entity_context ============

#[derive(Deserialize)]
struct EntityContextRequest {
    entity_name: String,
    max_hops: Option<u32>,
}

async fn handle_get_entity_context(
    State(state): State<AppState>,
    Json(req): Json<EntityContextRequest>,
) -> Json<Value> {
    let Some(graph) = state.graph_store.as_ref().as_ref() else {
        return Json(json!({
            "success": false,
            "error": "graph store is not configured; set [graph].enabled = true",
        }));
    };
    match graph.entity_context(&req.entity_name, req.max_hops.unwrap_or(2), 20).await {
        Ok(Some(context)) => Json(json!({ "success": true, "entity": context })),
        Ok(None) => Json(json!({ "success": false, "error": format!("entity not found: {}", req.entity_name) })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

// ============ GET /health ============

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

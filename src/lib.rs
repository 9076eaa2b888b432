//! # crawl-rag
//!
//! A web-crawling retrieval service: crawl strategies feed a chunk/embed/
//! store pipeline with deduplication and contextual embedding, backed by a
//! dual store — SQLite for chunk/code vectors and keyword search, Neo4j for
//! the entity/relationship graph — queried through hybrid search, reranking,
//! and size-bounded pagination.
//!
//! ## Architecture
//!
//! ```text
//! crawl (C9/C10) -> chunk/embed/store (C2-C6) -> vector_store + graph_store
//!                                                        |
//!                                   retrieval (C13) <----+
//!                                        |
//!                               CLI (ctx) / HTTP (server)
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — Core data types: `Source`, `CrawledPage`, `DocumentChunk`, `CodeExample`, graph entities
//! - [`crawl`] — Fetching ([`crawl::fetch`]), strategies ([`crawl::strategy`]), orchestration ([`crawl::orchestrator`])
//! - [`chunk`] — Paragraph-boundary text chunker
//! - [`code_extract`] — Fenced code block extraction for `search_code_examples`
//! - [`embedding`] — Embedding provider trait and OpenAI/Ollama/local implementations
//! - [`entity_extract`] — LLM-driven entity/relationship extraction for the graph store
//! - [`llm`] — Summarization, contextual chunk prefixes, and `graphrag_query` answer synthesis
//! - [`rerank`] — Cross-encoder reranking
//! - [`size_manager`] — Response-size budgeting and content truncation
//! - [`vector_store`] — SQLite-backed chunk/code vector and keyword store
//! - [`graph_store`] — Neo4j-backed entity/relationship graph store
//! - [`retrieval`] — `perform_rag_query` / `search_code_examples` / `graphrag_query`
//! - [`sources`] — `get_available_sources`
//! - [`validate`] — Input validation and URL classification
//! - [`error`] — Shared error taxonomy
//! - [`migrate`] — SQLite schema migrations
//! - [`server`] — HTTP control plane (Axum)

pub mod chunk;
pub mod code_extract;
pub mod config;
pub mod crawl;
mod db;
pub mod embedding;
pub mod entity_extract;
pub mod error;
pub mod graph_store;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod size_manager;
pub mod sources;
pub mod validate;
pub mod vector_store;

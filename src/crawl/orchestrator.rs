//! Crawl orchestrator (C10): wraps the C9 strategies with the memory
//! monitor, stealth mode, and multi-URL configuration, and owns the
//! write-side contract the strategies don't: sources upserted before any
//! chunk referencing them, and the per-request aggregate counters.
//!
//! One-way ("strategy returns documents; orchestrator writes") contract per
//! spec.md §9 — breaks the cyclic orchestrator/strategy reference the
//! original implementation had.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::System;

use crate::code_extract::{self, DEFAULT_CONTEXT_CHARS, DEFAULT_MIN_LENGTH};
use crate::config::Config;
use crate::crawl::fetch::{FetchOptions, PageFetcher};
use crate::crawl::strategy::{self, CrawlOptions, CrawledDocument};
use crate::embedding::EmbeddingProvider;
use crate::entity_extract;
use crate::graph_store::GraphStore;
use crate::llm;
use crate::models::CrawledPage;
use crate::vector_store::VectorStore;

/// Default batch size for document inserts (spec.md §9: "the spec fixes
/// the batch default at 20"). Not currently load-bearing since
/// `VectorStore::replace_documents` embeds/stores a whole page's chunks in
/// one call, but kept as the named constant the spec pins.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 20;

/// Resident-memory sampling and adaptive throttling across a multi-batch
/// crawl. Halves the per-batch concurrency when resident memory crosses
/// `threshold_mb`, never below 1; cannot restore it within the same run
/// (matches spec.md §5's backpressure model).
pub struct MemoryMonitor {
    threshold_mb: u64,
    sys: System,
    samples_mb: Vec<u64>,
    throttle_count: u32,
}

impl MemoryMonitor {
    pub fn new(threshold_mb: u64) -> Self {
        Self {
            threshold_mb,
            sys: System::new(),
            samples_mb: Vec::new(),
            throttle_count: 0,
        }
    }

    /// Sample resident memory for the current process and return the
    /// concurrency to use for the next batch: unchanged if under the
    /// threshold, halved (never below 1) otherwise.
    pub fn sample_and_throttle(&mut self, current_concurrency: usize) -> usize {
        self.sys.refresh_memory();
        let pid = sysinfo::get_current_pid().ok();
        let used_mb = pid
            .and_then(|p| {
                self.sys.refresh_process(p);
                self.sys.process(p).map(|proc| proc.memory() / (1024 * 1024))
            })
            .unwrap_or_else(|| self.sys.used_memory() / (1024 * 1024));

        self.samples_mb.push(used_mb);

        if used_mb > self.threshold_mb && current_concurrency > 1 {
            self.throttle_count += 1;
            (current_concurrency / 2).max(1)
        } else {
            current_concurrency
        }
    }

    pub fn report(&self) -> MemoryReport {
        let peak_mb = self.samples_mb.iter().copied().max().unwrap_or(0);
        let mean_mb = if self.samples_mb.is_empty() {
            0
        } else {
            self.samples_mb.iter().sum::<u64>() / self.samples_mb.len() as u64
        };
        MemoryReport {
            peak_mb,
            mean_mb,
            throttle_count: self.throttle_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub peak_mb: u64,
    pub mean_mb: u64,
    pub throttle_count: u32,
}

/// Per-URL-type content profile used by multi-URL config (C10): a CSS
/// selector hint (carried for a future DOM-capable fetcher; the current
/// `HttpFetcher` has no DOM to select against) and a minimum word count
/// below which the page is treated as too thin to be worth storing.
#[derive(Debug, Clone)]
pub struct UrlTypeProfile {
    pub css_selector: Option<&'static str>,
    pub min_word_count: usize,
}

/// Classify a URL by substring into documentation/article/general, per
/// spec.md §4.10.
pub fn classify_url_type(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    const DOC_MARKERS: &[&str] = &["docs", "documentation", "api", "reference", "guide"];
    const ARTICLE_MARKERS: &[&str] = &["news", "blog", "article", "post"];

    if DOC_MARKERS.iter().any(|m| lower.contains(m)) {
        "documentation"
    } else if ARTICLE_MARKERS.iter().any(|m| lower.contains(m)) {
        "article"
    } else {
        "general"
    }
}

pub fn profile_for(url_type: &str) -> UrlTypeProfile {
    match url_type {
        "documentation" => UrlTypeProfile {
            css_selector: Some("main, article, .content, #content"),
            min_word_count: 20,
        },
        "article" => UrlTypeProfile {
            css_selector: Some("article, .post-content"),
            min_word_count: 100,
        },
        _ => UrlTypeProfile {
            css_selector: None,
            min_word_count: 10,
        },
    }
}

/// Options controlling how much of the ingest pipeline runs for a crawl
/// request: chunk size, whether code examples are extracted (C3/C5,
/// gated by `USE_AGENTIC_RAG`), and whether entities/relationships are
/// extracted into the graph store (C8/C7, gated by `USE_KNOWLEDGE_GRAPH`).
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub use_contextual_embeddings: bool,
    pub extract_code: bool,
    pub extract_graph: bool,
}

/// Aggregate counters returned to every crawl tool, per spec.md §4.10's
/// "final aggregate per request" contract.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub pages_crawled: usize,
    pub chunks_stored: usize,
    pub code_examples_stored: usize,
    pub sources_updated: usize,
    pub entities_stored: usize,
    pub relationships_stored: usize,
    pub failed_urls: Vec<String>,
}

impl std::ops::AddAssign for IngestSummary {
    fn add_assign(&mut self, other: Self) {
        self.pages_crawled += other.pages_crawled;
        self.chunks_stored += other.chunks_stored;
        self.code_examples_stored += other.code_examples_stored;
        self.sources_updated += other.sources_updated;
        self.entities_stored += other.entities_stored;
        self.relationships_stored += other.relationships_stored;
        self.failed_urls.extend(other.failed_urls);
    }
}

/// Write one crawled document through the full pipeline: source upsert
/// (always first), chunk + embed + store (C2/C4/C6), optional code
/// extraction + summarize + store (C3/C5/C6), optional entity/relationship
/// extraction + graph write (C8/C7). Best-effort throughout: a failure in
/// one sub-step does not abort the others.
pub async fn ingest_document(
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    doc: &CrawledDocument,
    options: &IngestOptions,
) -> IngestSummary {
    let mut summary = IngestSummary::default();

    if !crate::validate::is_safe_for_storage(&doc.url) {
        summary.failed_urls.push(doc.url.clone());
        return summary;
    }

    let source_id = crate::validate::source_id(&doc.url);
    let document_id = crate::validate::document_id(&doc.url);
    let now = chrono::Utc::now().timestamp();
    let word_count = doc.markdown.split_whitespace().count() as i64;

    let source_summary = llm::source_summary(&config.llm, &source_id, &doc.markdown).await;
    if vector_store
        .upsert_source(&source_id, Some(&source_summary), word_count, now)
        .await
        .is_ok()
    {
        summary.sources_updated += 1;
    }

    if let Some(graph) = graph_store {
        let title = doc.markdown.lines().next().map(|l| l.trim_start_matches('#').trim());
        if let Err(e) = graph
            .store_document(&document_id, &doc.url, title, &source_id, now)
            .await
        {
            tracing::warn!(url = %doc.url, error = %e, "graph document write failed");
        }
    }

    let chunks = crate::chunk::chunk_text(&document_id, &doc.markdown, options.chunk_size);
    let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let page = CrawledPage {
        id: document_id.clone(),
        source_id: source_id.clone(),
        url: doc.url.clone(),
        title: doc.markdown.lines().next().map(|l| l.trim_start_matches('#').trim().to_string()),
        crawled_at: now,
    };

    match vector_store
        .replace_documents(
            &page,
            &chunk_texts,
            provider,
            &config.embedding,
            &config.llm,
            options.use_contextual_embeddings,
            None,
        )
        .await
    {
        Ok(stored) => summary.chunks_stored += stored,
        Err(e) => {
            tracing::warn!(url = %doc.url, error = %e, "chunk store failed");
            summary.failed_urls.push(doc.url.clone());
        }
    }

    if options.extract_code {
        let blocks = code_extract::extract_code_blocks(&doc.markdown, DEFAULT_MIN_LENGTH, DEFAULT_CONTEXT_CHARS);
        if !blocks.is_empty() {
            match vector_store
                .replace_code_examples(&document_id, &doc.url, &source_id, &blocks, provider, &config.embedding, &config.llm)
                .await
            {
                Ok(stored) => summary.code_examples_stored += stored,
                Err(e) => tracing::warn!(url = %doc.url, error = %e, "code example store failed"),
            }
        }
    }

    if options.extract_graph {
        if let Some(graph) = graph_store {
            let extraction = entity_extract::extract_from_chunks(&config.llm, &chunk_texts).await;
            summary.entities_stored += graph.store_entities(&document_id, &extraction.entities).await;
            summary.relationships_stored += graph.store_relationships(&extraction.relationships).await;
        }
    }

    summary.pages_crawled = 1;
    summary
}

/// Write every document returned by a strategy through [`ingest_document`],
/// sequentially — chunk/embed/store already fans out internally via C4's
/// batching, so there is no benefit to additional page-level parallelism
/// here, and it keeps source-upsert-before-chunk-insert ordering trivial to
/// reason about per page.
pub async fn ingest_documents(
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    documents: &[CrawledDocument],
    options: &IngestOptions,
) -> IngestSummary {
    let mut total = IngestSummary::default();
    for doc in documents {
        total += ingest_document(vector_store, graph_store, provider, config, doc, options).await;
    }
    total
}

/// `crawl_single_page`: one fetch, one document, full ingest.
pub async fn crawl_single_page(
    fetcher: &dyn PageFetcher,
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    url: &str,
    ingest_options: &IngestOptions,
) -> (strategy::CrawlResult, IngestSummary) {
    let result = strategy::single(fetcher, url, &CrawlOptions::default()).await;
    let summary = ingest_documents(vector_store, graph_store, provider, config, &result.documents, ingest_options).await;
    (result, summary)
}

/// `smart_crawl_url`: auto-select a C9 strategy by URL classification.
pub async fn smart_crawl_url(
    fetcher: &dyn PageFetcher,
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    url: &str,
    crawl_options: &CrawlOptions,
    ingest_options: &IngestOptions,
) -> (strategy::CrawlResult, IngestSummary) {
    let result = strategy::dispatch(fetcher, url, crawl_options).await;
    let summary = ingest_documents(vector_store, graph_store, provider, config, &result.documents, ingest_options).await;
    (result, summary)
}

/// `crawl_with_stealth_mode`: smart crawl, but fetches use the "undetected"
/// profile plus an optional CSS-wait/extra-delay hint (both accepted for
/// contract completeness; the HTTP fetcher has no DOM to wait on).
pub async fn crawl_with_stealth_mode(
    fetcher: &dyn PageFetcher,
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    url: &str,
    wait_for_selector: Option<String>,
    extra_wait_ms: Option<u64>,
    ingest_options: &IngestOptions,
) -> (strategy::CrawlResult, IngestSummary) {
    let crawl_options = CrawlOptions {
        fetch: FetchOptions {
            stealth: true,
            wait_for_selector,
            extra_wait_ms,
        },
        ..CrawlOptions::default()
    };
    let result = strategy::dispatch(fetcher, url, &crawl_options).await;
    let summary = ingest_documents(vector_store, graph_store, provider, config, &result.documents, ingest_options).await;
    (result, summary)
}

/// `crawl_with_multi_url_config`: each URL classified by substring into a
/// content-type profile and run independently; one URL's failure does not
/// affect the others.
pub async fn crawl_with_multi_url_config(
    fetcher: &dyn PageFetcher,
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    urls: &[String],
    max_concurrent: usize,
    ingest_options: &IngestOptions,
) -> Vec<(String, &'static str, strategy::CrawlResult, IngestSummary)> {
    let mut out = Vec::with_capacity(urls.len());
    for url in urls {
        let url_type = classify_url_type(url);
        let profile = profile_for(url_type);
        let crawl_options = CrawlOptions {
            max_concurrent,
            ..CrawlOptions::default()
        };
        let result = strategy::dispatch(fetcher, url, &crawl_options).await;

        let filtered_docs: Vec<CrawledDocument> = result
            .documents
            .iter()
            .filter(|d| d.markdown.split_whitespace().count() >= profile.min_word_count)
            .cloned()
            .collect();

        let summary = ingest_documents(vector_store, graph_store, provider, config, &filtered_docs, ingest_options).await;
        out.push((url.clone(), url_type, result, summary));
    }
    out
}

/// `crawl_with_memory_monitoring`: smart crawl with resident-memory
/// sampling before each recursion depth; concurrency halves (never below
/// 1) once the threshold is crossed and cannot recover within the run.
pub async fn crawl_with_memory_monitoring(
    fetcher: &dyn PageFetcher,
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    url: &str,
    threshold_mb: u64,
    ingest_options: &IngestOptions,
) -> (strategy::CrawlResult, IngestSummary, MemoryReport) {
    let mut monitor = MemoryMonitor::new(threshold_mb);
    let mut concurrency = config.crawl.default_max_concurrent as usize;
    concurrency = monitor.sample_and_throttle(concurrency);

    let crawl_options = CrawlOptions {
        max_depth: config.crawl.default_max_depth,
        max_concurrent: concurrency,
        fetch: FetchOptions::default(),
    };
    let result = strategy::dispatch(fetcher, url, &crawl_options).await;
    // Sample once more post-crawl so a single-batch crawl still produces a
    // meaningful peak/mean rather than only the pre-crawl reading.
    monitor.sample_and_throttle(concurrency);

    let summary = ingest_documents(vector_store, graph_store, provider, config, &result.documents, ingest_options).await;
    (result, summary, monitor.report())
}

/// `crawl_with_graph_extraction`: dual-write ingest — always stores chunks
/// in the vector store, and additionally extracts entities/relationships
/// into the graph store when `graph_store` is configured.
pub async fn crawl_with_graph_extraction(
    fetcher: &dyn PageFetcher,
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    url: &str,
    chunk_size: usize,
) -> (strategy::CrawlResult, IngestSummary) {
    let crawl_options = CrawlOptions {
        max_depth: config.crawl.default_max_depth,
        max_concurrent: config.crawl.default_max_concurrent as usize,
        fetch: FetchOptions::default(),
    };
    let ingest_options = IngestOptions {
        chunk_size,
        use_contextual_embeddings: config.features.use_contextual_embeddings,
        extract_code: config.features.use_agentic_rag,
        extract_graph: true,
    };
    let result = strategy::dispatch(fetcher, url, &crawl_options).await;
    let summary = ingest_documents(vector_store, graph_store, provider, config, &result.documents, &ingest_options).await;
    (result, summary)
}

/// Shared fetch timeout helper: builds an [`crate::crawl::fetch::HttpFetcher`]
/// honoring `Config.timeouts.crawler_secs`.
pub fn default_fetcher(config: &Config) -> anyhow::Result<Arc<dyn PageFetcher>> {
    let fetcher = crate::crawl::fetch::HttpFetcher::new(Duration::from_secs(config.timeouts.crawler_secs))?;
    Ok(Arc::new(fetcher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_documentation_urls() {
        assert_eq!(classify_url_type("https://example.com/docs/guide"), "documentation");
        assert_eq!(classify_url_type("https://api.example.com/reference"), "documentation");
    }

    #[test]
    fn classifies_article_urls() {
        assert_eq!(classify_url_type("https://example.com/blog/post-1"), "article");
        assert_eq!(classify_url_type("https://news.example.com/today"), "article");
    }

    #[test]
    fn classifies_general_urls_by_default() {
        assert_eq!(classify_url_type("https://example.com/about"), "general");
    }

    #[test]
    fn memory_monitor_halves_concurrency_above_threshold_never_below_one() {
        let mut monitor = MemoryMonitor::new(0);
        let next = monitor.sample_and_throttle(8);
        assert!(next <= 8);
        let mut c = 8;
        for _ in 0..10 {
            c = monitor.sample_and_throttle(c);
        }
        assert!(c >= 1);
        assert!(monitor.report().throttle_count > 0);
    }

    #[test]
    fn memory_monitor_does_not_throttle_under_threshold() {
        let mut monitor = MemoryMonitor::new(u64::MAX);
        let next = monitor.sample_and_throttle(8);
        assert_eq!(next, 8);
        assert_eq!(monitor.report().throttle_count, 0);
    }

    #[test]
    fn ingest_summary_add_assign_accumulates() {
        let mut a = IngestSummary {
            pages_crawled: 1,
            chunks_stored: 2,
            code_examples_stored: 0,
            sources_updated: 1,
            entities_stored: 0,
            relationships_stored: 0,
            failed_urls: vec![],
        };
        let b = IngestSummary {
            pages_crawled: 1,
            chunks_stored: 3,
            code_examples_stored: 1,
            sources_updated: 1,
            entities_stored: 2,
            relationships_stored: 1,
            failed_urls: vec!["https://example.com/bad".into()],
        };
        a += b;
        assert_eq!(a.pages_crawled, 2);
        assert_eq!(a.chunks_stored, 5);
        assert_eq!(a.failed_urls.len(), 1);
    }
}

//! Core data models used throughout crawl-rag.
//!
//! These types represent the sources, crawled pages, chunks, code examples,
//! and graph entities/relationships that flow through the ingestion and
//! retrieval pipeline.

/// A chunk of a document's body text, identity-stamped with a UUID and a
/// content hash for staleness detection.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A crawled authority/host, tracked independently of any single page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Source {
    pub source_id: String,
    pub summary: Option<String>,
    pub total_word_count: i64,
    pub first_crawled_at: i64,
    pub last_crawled_at: i64,
}

/// A single crawled page, chunked into [`DocumentChunk`] rows.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub id: String,
    pub source_id: String,
    pub url: String,
    pub title: Option<String>,
    pub crawled_at: i64,
}

/// A chunk of a [`CrawledPage`], embedded and stored in the vector store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub url: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata_json: String,
}

/// An extracted code example, embedded separately from its surrounding
/// document chunks. `(url, chunk_index)` is unique, in a namespace separate
/// from [`DocumentChunk`]'s.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CodeExample {
    pub id: String,
    pub document_id: String,
    pub url: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub language: Option<String>,
    pub code: String,
    pub summary: String,
}

/// One of the six canonical knowledge-graph entity labels. Unrecognized
/// type strings from an extractor are resolved against this set via
/// [`crate::graph_store::resolve_entity_label`] before storage.
pub const ENTITY_LABELS: &[&str] = &[
    "Concept",
    "Technology",
    "Configuration",
    "Person",
    "Organization",
    "Product",
];

/// A node in the knowledge graph: an entity of one of the six canonical
/// types, with a mention count accumulated from the document it was
/// extracted from.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GraphEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    /// Number of times this entity was mentioned in the document it was
    /// extracted from (before cross-document accumulation in the graph).
    pub mentions: i64,
}

/// A directed, typed relationship edge between two entities. `relationship_type`
/// is normalized against the closed label set in [`crate::graph_store`]
/// before storage; unrecognized labels collapse to `RELATED_TO`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GraphRelationship {
    pub from_entity: String,
    pub to_entity: String,
    pub relationship_type: String,
    pub description: String,
    /// Confidence the extractor assigned to this relationship, in `[0, 1]`.
    pub confidence: f64,
}

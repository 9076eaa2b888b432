//! `get_available_sources` tool: lists every `Source` row the vector store
//! has accumulated, for a client to discover what `source_filter` values
//! are valid before issuing a retrieval query.

use serde_json::{json, Value};

use crate::vector_store::VectorStore;

/// Fetch all known sources and wrap them in the standard response envelope.
pub async fn get_available_sources(vector_store: &VectorStore) -> Value {
    match vector_store.get_sources().await {
        Ok(sources) => json!({
            "success": true,
            "count": sources.len(),
            "sources": sources,
        }),
        Err(e) => json!({
            "success": false,
            "error": format!("failed to list sources: {e}"),
        }),
    }
}

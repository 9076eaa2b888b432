//! Retrieval orchestrator (C13): `rag_query`, `search_code_examples`, and
//! `graphrag_query` — the three tool entry points that turn a query string
//! into a scored, paginated, size-bounded response envelope.
//!
//! State machine per request: `embed -> vector_search -> [keyword_search] ->
//! merge -> [rerank] -> paginate -> size_fit -> [enrich] -> [LLM] ->
//! respond`. Any single step's failure short-circuits to a `success: false`
//! envelope; no step retries on its own here — retries live inside C4/C6/C7.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::graph_store::GraphStore;
use crate::llm;
use crate::models::{CodeExample, DocumentChunk};
use crate::rerank;
use crate::size_manager::{fit_results, warning_for, SizeConstraints};
use crate::validate;
use crate::vector_store::VectorStore;

fn error_envelope(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": message.into() })
}

/// Promote every id appearing in both `vector` and `keyword` (boosted by
/// `x1.2`, capped at 1.0), then fill with remaining vector-only rows at
/// their own score, then pad with keyword-only rows at a flat 0.5. Stops
/// once `limit` rows are collected. Every id appears at most once, and
/// both-set rows always precede keyword-only rows in the returned order.
fn promote_merge<T: Clone>(
    vector: Vec<(T, f64)>,
    keyword: Option<Vec<(T, f64)>>,
    id_of: impl Fn(&T) -> String,
    limit: usize,
) -> Vec<(T, f64)> {
    let Some(keyword) = keyword else {
        let mut out = vector;
        out.truncate(limit);
        return out;
    };

    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(limit.min(vector.len() + keyword.len()));

    for (item, score) in &vector {
        if out.len() >= limit {
            break;
        }
        let id = id_of(item);
        if keyword.iter().any(|(k, _)| id_of(k) == id) {
            out.push((item.clone(), (score * 1.2).min(1.0)));
            used.insert(id);
        }
    }
    for (item, score) in &vector {
        if out.len() >= limit {
            break;
        }
        let id = id_of(item);
        if !used.contains(&id) {
            out.push((item.clone(), *score));
            used.insert(id);
        }
    }
    for (item, _score) in &keyword {
        if out.len() >= limit {
            break;
        }
        let id = id_of(item);
        if !used.contains(&id) {
            out.push((item.clone(), 0.5));
            used.insert(id);
        }
    }

    out
}

/// `rag_query`: hybrid+rerank+size-bounded retrieval over document chunks.
#[allow(clippy::too_many_arguments)]
pub async fn rag_query(
    vector_store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    query: &str,
    source_filter: Option<&str>,
    match_count: u32,
    offset: usize,
    max_content_length: usize,
    include_full_content: bool,
    max_response_tokens: usize,
) -> Value {
    let query = match validate::validate_query(query, config.retrieval.min_query_length) {
        Ok(q) => q,
        Err(e) => return error_envelope(e.to_string()),
    };
    let match_count = match validate::validate_match_count(match_count) {
        Ok(n) => n as usize,
        Err(e) => return error_envelope(e.to_string()),
    };
    let source_filter = validate::validate_source_filter(source_filter);

    let candidate_k = offset + match_count + config.retrieval.candidate_buffer;
    let hybrid = config.features.use_hybrid_search;

    let vector_candidates = match vector_store
        .search_documents(provider, &config.embedding, query, source_filter.as_deref(), candidate_k)
        .await
    {
        Ok(c) => c,
        Err(e) => return error_envelope(format!("vector search failed: {e}")),
    };

    let keyword_candidates = if hybrid {
        match vector_store
            .keyword_documents(query, source_filter.as_deref(), candidate_k)
            .await
        {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "keyword search failed, continuing vector-only");
                Some(Vec::new())
            }
        }
    } else {
        None
    };

    let vector_pairs: Vec<(DocumentChunk, f64)> =
        vector_candidates.into_iter().map(|c| (c.chunk, c.raw_score)).collect();
    let keyword_pairs: Option<Vec<(DocumentChunk, f64)>> =
        keyword_candidates.map(|v| v.into_iter().map(|c| (c.chunk, c.raw_score)).collect());

    let merged = promote_merge(vector_pairs, keyword_pairs, |c| c.id.clone(), offset + match_count);

    let reranking = config.features.use_reranking;
    let mut scored: Vec<(DocumentChunk, f64, Option<f32>)> = if reranking {
        let texts: Vec<String> = merged.iter().map(|(c, _)| c.text.clone()).collect();
        let rerank_scores = rerank::predict(query, &texts).await;
        let mut combined: Vec<(DocumentChunk, f64, Option<f32>)> = merged
            .into_iter()
            .zip(rerank_scores)
            .map(|((chunk, similarity), score)| (chunk, similarity, Some(score)))
            .collect();
        // Cross-encoder score is authoritative after rerank (§9).
        combined.sort_by(|a, b| {
            b.2.unwrap_or(rerank::NEUTRAL_SCORE)
                .partial_cmp(&a.2.unwrap_or(rerank::NEUTRAL_SCORE))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        combined
    } else {
        merged.into_iter().map(|(c, s)| (c, s, None)).collect()
    };

    let total_candidates = scored.len();
    if offset < scored.len() {
        scored = scored.split_off(offset);
    } else {
        scored.clear();
    }
    scored.truncate(match_count);
    let page_len = scored.len();

    let constraints = SizeConstraints::new(max_response_tokens, max_content_length, include_full_content, 0);
    let (fitted, diagnostic) = fit_results(scored, &constraints, |(chunk, _, _)| chunk.text.as_str());

    let results: Vec<Value> = fitted
        .into_iter()
        .map(|f| {
            let (chunk, similarity, rerank_score) = f.item;
            let metadata: Value = serde_json::from_str(&chunk.metadata_json).unwrap_or_else(|_| json!({}));
            let mut obj = json!({
                "url": chunk.url,
                "content": f.content,
                "metadata": metadata,
                "similarity": similarity,
            });
            if let Some(score) = rerank_score {
                obj["rerank_score"] = json!(score);
            }
            obj
        })
        .collect();

    let warning = warning_for(&diagnostic);
    let has_more = offset + page_len < total_candidates;
    let count = results.len();

    json!({
        "success": true,
        "query": query,
        "search_mode": if hybrid { "hybrid" } else { "semantic" },
        "reranking_applied": reranking,
        "results": results,
        "count": count,
        "pagination": {
            "offset": offset,
            "requested_count": match_count,
            "returned_count": diagnostic.final_count,
            "has_more": has_more,
        },
        "warning": warning,
        "truncation_info": if diagnostic.truncated { Some(diagnostic) } else { None },
    })
}

/// `search_code_examples`: the same embed/merge/rerank/size-fit pipeline as
/// [`rag_query`], run over `code_examples` instead of document chunks.
pub async fn search_code_examples(
    vector_store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    query: &str,
    source_filter: Option<&str>,
    match_count: u32,
) -> Value {
    let query = match validate::validate_query(query, config.retrieval.min_query_length) {
        Ok(q) => q,
        Err(e) => return error_envelope(e.to_string()),
    };
    let match_count = match validate::validate_match_count(match_count) {
        Ok(n) => n as usize,
        Err(e) => return error_envelope(e.to_string()),
    };
    let source_filter = validate::validate_source_filter(source_filter);

    let candidate_k = match_count + config.retrieval.candidate_buffer;
    let hybrid = config.features.use_hybrid_search;

    let vector_candidates = match vector_store
        .search_code_examples(provider, &config.embedding, query, source_filter.as_deref(), candidate_k)
        .await
    {
        Ok(c) => c,
        Err(e) => return error_envelope(format!("vector search failed: {e}")),
    };

    let keyword_candidates = if hybrid {
        match vector_store
            .keyword_code_examples(query, source_filter.as_deref(), candidate_k)
            .await
        {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "keyword search failed, continuing vector-only");
                Some(Vec::new())
            }
        }
    } else {
        None
    };

    let vector_pairs: Vec<(CodeExample, f64)> =
        vector_candidates.into_iter().map(|c| (c.example, c.raw_score)).collect();
    let keyword_pairs: Option<Vec<(CodeExample, f64)>> =
        keyword_candidates.map(|v| v.into_iter().map(|c| (c.example, c.raw_score)).collect());

    let merged = promote_merge(vector_pairs, keyword_pairs, |c| c.id.clone(), match_count);

    let constraints = SizeConstraints::new(
        config.retrieval.default_max_response_tokens,
        config.retrieval.default_max_content_length,
        true,
        0,
    );
    let (fitted, diagnostic) = fit_results(merged, &constraints, |(example, _)| example.code.as_str());

    let results: Vec<Value> = fitted
        .into_iter()
        .map(|f| {
            let (example, similarity) = f.item;
            json!({
                "url": example.url,
                "code": f.content,
                "language": example.language,
                "summary": example.summary,
                "similarity": similarity,
            })
        })
        .collect();

    json!({
        "success": true,
        "query": query,
        "search_mode": if hybrid { "hybrid" } else { "semantic" },
        "results": results,
        "count": diagnostic.final_count,
        "warning": warning_for(&diagnostic),
    })
}

/// `graphrag_query`: [`rag_query`]'s vector/keyword retrieval followed by
/// best-effort knowledge-graph enrichment of the top results and a single
/// LLM completion grounded in both.
#[allow(clippy::too_many_arguments)]
pub async fn graphrag_query(
    vector_store: &VectorStore,
    graph_store: Option<&GraphStore>,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    query: &str,
    use_graph_enrichment: bool,
    max_entities: usize,
    source_filter: Option<&str>,
    match_count: u32,
    offset: usize,
    max_content_length: usize,
    include_full_content: bool,
    max_response_tokens: usize,
) -> Value {
    let retrieval = rag_query(
        vector_store,
        provider,
        config,
        query,
        source_filter,
        match_count,
        offset,
        max_content_length,
        include_full_content,
        max_response_tokens,
    )
    .await;

    if retrieval["success"] != json!(true) {
        return retrieval;
    }

    let results = retrieval["results"].as_array().cloned().unwrap_or_default();
    let mut warnings: Vec<String> = Vec::new();
    if let Some(w) = retrieval["warning"].as_str() {
        warnings.push(w.to_string());
    }

    let document_ids: Vec<String> = results
        .iter()
        .filter_map(|r| r["metadata"]["document_id"].as_str().map(str::to_string))
        .collect();

    let (graph_enrichment_used, entities_found, concepts, dependencies) =
        if use_graph_enrichment && !document_ids.is_empty() {
            if let Some(graph) = graph_store {
                let enrichment = graph.enrich_documents(&document_ids, max_entities).await;
                let concepts: Vec<String> = enrichment.entities.iter().map(|e| e.name.clone()).collect();
                let dependencies: Vec<Value> = enrichment
                    .entities
                    .iter()
                    .flat_map(|e| {
                        e.related.iter().map(move |r| {
                            json!({ "from": e.name, "to": r.name, "relationship": r.relationship })
                        })
                    })
                    .collect();
                (!enrichment.entities.is_empty(), enrichment.entities.len(), concepts, dependencies)
            } else {
                warnings.push("graph enrichment requested but no graph store is configured".to_string());
                (false, 0, Vec::new(), Vec::new())
            }
        } else if use_graph_enrichment {
            warnings.push(
                "graph enrichment unavailable for these results, likely ingested without the graph path; re-ingest with crawl_with_graph_extraction to enable it".to_string(),
            );
            (false, 0, Vec::new(), Vec::new())
        } else {
            (false, 0, Vec::new(), Vec::new())
        };

    let enrichment_markdown = if graph_enrichment_used {
        concepts.iter().map(|name| format!("- {name}")).collect::<Vec<_>>().join("\n")
    } else {
        String::new()
    };

    let snippets: Vec<String> = results
        .iter()
        .take(5)
        .filter_map(|r| r["content"].as_str())
        .map(str::to_string)
        .collect();

    let prompt = format!(
        "## Related entities\n{}\n\n## Document excerpts\n\n{}",
        if enrichment_markdown.is_empty() {
            "(none)".to_string()
        } else {
            enrichment_markdown
        },
        snippets
            .iter()
            .enumerate()
            .map(|(i, s)| format!("### Excerpt {}\n{}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n\n")
    );

    let full_prompt = format!("Question: {query}\n\n{prompt}");
    let answer = llm::answer_query(&config.llm, &full_prompt).await;

    let sources: Vec<String> = {
        let mut seen = HashSet::new();
        results
            .iter()
            .filter_map(|r| r["url"].as_str().map(str::to_string))
            .filter(|u| seen.insert(u.clone()))
            .collect()
    };

    json!({
        "success": true,
        "query": query,
        "answer": answer,
        "graph_enrichment_used": graph_enrichment_used,
        "graph_enrichment": {
            "entities_found": entities_found,
            "concepts": concepts,
            "dependencies": dependencies,
        },
        "pagination": retrieval["pagination"],
        "sources": sources,
        "warnings": warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_merge_without_keyword_just_truncates() {
        let vector = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
        let merged = promote_merge(vector, None, |s| s.clone(), 1);
        assert_eq!(merged, vec![("a".to_string(), 0.9)]);
    }

    #[test]
    fn promote_merge_boosts_both_set_rows_first() {
        let vector = vec![
            ("a".to_string(), 0.9),
            ("b".to_string(), 0.7),
            ("c".to_string(), 0.6),
        ];
        let keyword = vec![("b".to_string(), 0.1), ("d".to_string(), 0.2)];
        let merged = promote_merge(vector, Some(keyword), |s| s.clone(), 4);

        assert_eq!(merged[0].0, "b");
        assert!((merged[0].1 - 0.84).abs() < 1e-9);

        let ids: Vec<&str> = merged.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn promote_merge_never_duplicates_an_id() {
        let vector = vec![("a".to_string(), 0.9)];
        let keyword = vec![("a".to_string(), 0.1)];
        let merged = promote_merge(vector, Some(keyword), |s| s.clone(), 10);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn promote_merge_caps_boost_at_one() {
        let vector = vec![("a".to_string(), 0.95)];
        let keyword = vec![("a".to_string(), 0.9)];
        let merged = promote_merge(vector, Some(keyword), |s| s.clone(), 10);
        assert_eq!(merged[0].1, 1.0);
    }

    #[test]
    fn promote_merge_pads_with_keyword_only_at_flat_half() {
        let vector: Vec<(String, f64)> = vec![];
        let keyword = vec![("d".to_string(), 0.3)];
        let merged = promote_merge(vector, Some(keyword), |s| s.clone(), 10);
        assert_eq!(merged, vec![("d".to_string(), 0.5)]);
    }
}

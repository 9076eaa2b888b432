//! Cross-encoder reranking (C11): scores `(query, chunk)` pairs to refine
//! retrieval ordering.
//!
//! The model is loaded lazily, once, behind a process-wide singleton —
//! the first call to [`predict`] pays the load cost, every later call reuses
//! the same instance. Gated behind the `reranking` feature; with the feature
//! off, or if the model fails to load, every pair gets [`NEUTRAL_SCORE`] so
//! the merge-step ordering survives unchanged rather than being reshuffled.

use tokio::sync::OnceCell;

/// Score assigned when no model is available. Keeps existing order stable.
pub const NEUTRAL_SCORE: f32 = 0.5;

#[cfg(feature = "reranking")]
type SharedModel = std::sync::Arc<std::sync::Mutex<fastembed::TextRerank>>;

#[cfg(feature = "reranking")]
static MODEL: OnceCell<Option<SharedModel>> = OnceCell::const_new();

/// Score `documents` against `query`, one score per document, in input order.
/// Never fails.
pub async fn predict(query: &str, documents: &[String]) -> Vec<f32> {
    if documents.is_empty() {
        return Vec::new();
    }
    score(query, documents).await
}

#[cfg(feature = "reranking")]
async fn score(query: &str, documents: &[String]) -> Vec<f32> {
    let model = MODEL.get_or_init(|| async { load_model() }).await.clone();
    let Some(model) = model else {
        return vec![NEUTRAL_SCORE; documents.len()];
    };

    let query = query.to_string();
    let docs = documents.to_vec();
    let count = docs.len();

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f32>> {
        let mut guard = model
            .lock()
            .map_err(|e| anyhow::anyhow!("reranker model lock poisoned: {e}"))?;
        let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
        let results = guard
            .rerank(query, doc_refs, false, None)
            .map_err(|e| anyhow::anyhow!("reranking failed: {e}"))?;
        let mut scores = vec![NEUTRAL_SCORE; count];
        for r in results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    })
    .await;

    match outcome {
        Ok(Ok(scores)) => scores,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "reranking batch failed, falling back to neutral scores");
            vec![NEUTRAL_SCORE; documents.len()]
        }
        Err(e) => {
            tracing::warn!(error = %e, "reranking task panicked, falling back to neutral scores");
            vec![NEUTRAL_SCORE; documents.len()]
        }
    }
}

#[cfg(not(feature = "reranking"))]
async fn score(_query: &str, documents: &[String]) -> Vec<f32> {
    vec![NEUTRAL_SCORE; documents.len()]
}

/// Load the cross-encoder model once. Runs on first use; the `ort` backend
/// underneath fastembed prefers a GPU execution provider when the runtime
/// has one available, falling back to CPU automatically.
#[cfg(feature = "reranking")]
fn load_model() -> Option<SharedModel> {
    let init = fastembed::RerankInitOptions::new(fastembed::RerankerModel::BGERerankerBase)
        .with_show_download_progress(true);

    match fastembed::TextRerank::try_new(init) {
        Ok(model) => Some(std::sync::Arc::new(std::sync::Mutex::new(model))),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load reranker model, reranking will use neutral scores");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn predict_on_empty_documents_returns_empty() {
        let scores = predict("query", &[]).await;
        assert!(scores.is_empty());
    }

    #[cfg(not(feature = "reranking"))]
    #[tokio::test]
    async fn predict_without_feature_is_neutral_and_order_preserving() {
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let scores = predict("query", &docs).await;
        assert_eq!(scores, vec![NEUTRAL_SCORE; 3]);
    }
}

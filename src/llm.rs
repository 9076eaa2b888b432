//! LLM-backed short-form summarization.
//!
//! Three entry points, each a single low-temperature completion with a
//! small completion-token cap: [`source_summary`], [`code_example_summary`],
//! and [`chunk_context`]. None of these ever raise — on any failure
//! (disabled provider, network error, malformed response) they fall back
//! to a deterministic placeholder string so the caller's pipeline never
//! stalls on a missing summary.

use std::time::Duration;

use crate::config::LlmConfig;

const SUMMARY_TEMPERATURE: f64 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 200;

/// Summarize a crawled source (site or document collection) in one or two
/// sentences, for display alongside `get_available_sources`.
pub async fn source_summary(config: &LlmConfig, source_id: &str, sample_text: &str) -> String {
    let system = "You write a one or two sentence summary of a crawled web source, describing what kind of content it contains. Be concise.";
    let user = format!(
        "Source: {source_id}\n\nSample content:\n{}",
        truncate_chars(sample_text, 2000)
    );

    complete(config, system, &user)
        .await
        .unwrap_or_else(|_| format!("Content from {source_id}"))
}

/// Summarize an extracted code example in one sentence, describing what it
/// demonstrates, for embedding alongside the code body.
pub async fn code_example_summary(config: &LlmConfig, language: Option<&str>, code: &str) -> String {
    let system = "You write a one-sentence summary of a code example describing what it demonstrates. Be concise and specific.";
    let lang_hint = language.unwrap_or("unknown");
    let user = format!(
        "Language: {lang_hint}\n\nCode:\n{}",
        truncate_chars(code, 3000)
    );

    complete(config, system, &user)
        .await
        .unwrap_or_else(|_| format!("{lang_hint} code example"))
}

/// Produce a short contextual sentence situating a chunk within its parent
/// document, used to prepend to the chunk's embedding text when contextual
/// embeddings are enabled.
pub async fn chunk_context(config: &LlmConfig, document_title: &str, chunk_text: &str) -> String {
    let system = "You write a single short sentence of context situating an excerpt within its source document, to aid retrieval. Do not summarize the excerpt itself.";
    let user = format!(
        "Document: {document_title}\n\nExcerpt:\n{}",
        truncate_chars(chunk_text, 1500)
    );

    complete(config, system, &user)
        .await
        .unwrap_or_else(|_| format!("Excerpt from {document_title}"))
}

/// Answer a retrieval-augmented question given a prompt that already
/// contains the graph enrichment block and document snippets
/// (`graphrag_query`, C13). Wider completion budget than the other three
/// entry points since it's producing prose, not a one-liner; still
/// low-temperature and never raises — falls back to a message noting the
/// retrieved context is available even without a generated answer.
pub async fn answer_query(config: &LlmConfig, prompt: &str) -> String {
    let system = "You answer a user's question using only the provided document excerpts and related-entity context. Cite which excerpt supports each claim when possible. If the context is insufficient, say so.";

    complete_with_cap(config, system, prompt, 800)
        .await
        .unwrap_or_else(|_| {
            "Unable to generate an answer from the LLM provider; see the retrieved sources below.".to_string()
        })
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        text
    } else {
        let mut end = max_chars;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

async fn complete(config: &LlmConfig, system: &str, user: &str) -> anyhow::Result<String> {
    complete_with_cap(config, system, user, SUMMARY_MAX_TOKENS).await
}

async fn complete_with_cap(config: &LlmConfig, system: &str, user: &str, max_tokens: u32) -> anyhow::Result<String> {
    if !config.is_enabled() {
        anyhow::bail!("llm provider is disabled");
    }

    match config.provider.as_str() {
        "openai" => complete_openai(config, system, user, max_tokens).await,
        other => anyhow::bail!("unknown llm provider: {other}"),
    }
}

async fn complete_openai(config: &LlmConfig, system: &str, user: &str, max_tokens: u32) -> anyhow::Result<String> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ],
        "temperature": SUMMARY_TEMPERATURE,
        "max_tokens": max_tokens,
    });

    let response = client
        .post("https://api.openai.com/v1/chat/completions")
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat completion error {}: {}", status, body_text);
    }

    let json: serde_json::Value = response.json().await?;
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;

    Ok(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> LlmConfig {
        LlmConfig {
            provider: "disabled".to_string(),
            model: None,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn source_summary_falls_back_when_disabled() {
        let config = disabled_config();
        let summary = source_summary(&config, "example.com", "some sample text").await;
        assert_eq!(summary, "Content from example.com");
    }

    #[tokio::test]
    async fn code_example_summary_falls_back_when_disabled() {
        let config = disabled_config();
        let summary = code_example_summary(&config, Some("python"), "print('hi')").await;
        assert_eq!(summary, "python code example");
    }

    #[tokio::test]
    async fn chunk_context_falls_back_when_disabled() {
        let config = disabled_config();
        let summary = chunk_context(&config, "Guide", "some excerpt text").await;
        assert_eq!(summary, "Excerpt from Guide");
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_chars(text, 3);
        assert!(text.is_char_boundary(truncated.len()) || truncated.len() <= 3);
    }
}

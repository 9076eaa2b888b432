//! Entity and relationship extraction from document chunks.
//!
//! When an LLM is configured, each chunk is sent through a fixed system
//! prompt asking for 5-20 entities (of six canonical types) and typed
//! relationships between them, with extraction calls bounded to
//! [`MAX_CONCURRENT_EXTRACTIONS`] in flight via a semaphore. Results from
//! every chunk of a document are merged: entities are deduplicated by
//! trimmed name (mention counts sum, the longer description wins) and
//! relationships are deduplicated by `(from, to, type)`.
//!
//! When no LLM is configured, a regex-based rule fallback tags known
//! programming languages/frameworks/infra names and ALL_CAPS identifiers as
//! `Configuration` entities, with capitalized multi-word phrases rounding
//! out coverage as `Concept` entities, and produces no relationships —
//! enough to keep the graph non-empty without an API dependency.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Semaphore;

use crate::config::LlmConfig;
use crate::graph_store::RELATIONSHIP_LABELS;
use crate::models::{GraphEntity, GraphRelationship, ENTITY_LABELS};

/// Maximum number of chunk extractions running concurrently per document.
pub const MAX_CONCURRENT_EXTRACTIONS: usize = 3;

/// Build the fixed extraction system prompt from the canonical entity and
/// relationship label sets, so the prompt can never drift from what
/// [`crate::graph_store`] actually accepts.
fn system_prompt() -> String {
    format!(
        "You extract entities and relationships from a document excerpt for a knowledge graph. \
Identify 5 to 20 entities, each one of: {}. Use consistent casing for each entity's name and avoid \
generic nouns (\"code\", \"system\"). For each entity, count how many times it is mentioned in this excerpt. \
Then identify relationships between the entities you found, using one of these relationship types: \
{}. For each relationship, give a confidence score between 0 and 1. \
Respond as JSON: {{\"entities\": [{{\"name\": str, \"entity_type\": str, \"description\": str, \"mentions\": int}}], \
\"relationships\": [{{\"from_entity\": str, \"to_entity\": str, \"relationship_type\": str, \"description\": str, \"confidence\": float}}]}}.",
        ENTITY_LABELS.join(", "),
        RELATIONSHIP_LABELS.join(", "),
    )
}

pub struct ExtractionResult {
    pub entities: Vec<GraphEntity>,
    pub relationships: Vec<GraphRelationship>,
}

/// Extract and merge entities/relationships across every chunk of a
/// document, bounding concurrent LLM calls to [`MAX_CONCURRENT_EXTRACTIONS`].
pub async fn extract_from_chunks(llm_config: &LlmConfig, chunks: &[String]) -> ExtractionResult {
    if !llm_config.is_enabled() {
        return extract_with_rules(chunks);
    }

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_EXTRACTIONS));
    let mut handles = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let sem = semaphore.clone();
        let config = llm_config.clone();
        let chunk = chunk.clone();
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore not closed");
            extract_chunk_via_llm(&config, &chunk).await
        }));
    }

    let mut per_chunk = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Some(result)) => per_chunk.push(result),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "entity extraction task panicked"),
        }
    }

    merge_results(per_chunk)
}

async fn extract_chunk_via_llm(config: &LlmConfig, chunk: &str) -> Option<ExtractionResult> {
    match call_llm(config, chunk).await {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(error = %e, "entity extraction call failed for chunk, skipping");
            None
        }
    }
}

async fn call_llm(config: &LlmConfig, chunk: &str) -> anyhow::Result<ExtractionResult> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for entity extraction"))?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system_prompt()},
            {"role": "user", "content": chunk},
        ],
        "temperature": 0.2,
        "response_format": {"type": "json_object"},
    });

    let response = client
        .post("https://api.openai.com/v1/chat/completions")
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("entity extraction request failed: {}", response.status());
    }

    let json: serde_json::Value = response.json().await?;
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing message content in extraction response"))?;

    parse_extraction_json(content)
}

fn parse_extraction_json(content: &str) -> anyhow::Result<ExtractionResult> {
    let parsed: serde_json::Value = serde_json::from_str(content)?;

    let entities = parsed
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| {
                    let entity_type = e
                        .get("entity_type")
                        .and_then(|t| t.as_str())
                        .map(crate::graph_store::resolve_entity_label)
                        .unwrap_or("Concept")
                        .to_string();
                    let mentions = e
                        .get("mentions")
                        .and_then(|m| m.as_i64())
                        .filter(|m| *m > 0)
                        .unwrap_or(1);
                    Some(GraphEntity {
                        name: e.get("name")?.as_str()?.to_string(),
                        entity_type,
                        description: e
                            .get("description")
                            .and_then(|d| d.as_str())
                            .unwrap_or("")
                            .to_string(),
                        mentions,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let relationships = parsed
        .get("relationships")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    let confidence = r
                        .get("confidence")
                        .and_then(|c| c.as_f64())
                        .unwrap_or(0.5)
                        .clamp(0.0, 1.0);
                    Some(GraphRelationship {
                        from_entity: r.get("from_entity")?.as_str()?.to_string(),
                        to_entity: r.get("to_entity")?.as_str()?.to_string(),
                        relationship_type: r
                            .get("relationship_type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("RELATED_TO")
                            .to_string(),
                        description: r
                            .get("description")
                            .and_then(|d| d.as_str())
                            .unwrap_or("")
                            .to_string(),
                        confidence,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ExtractionResult { entities, relationships })
}

/// Merge per-chunk extraction results: entities dedupe by trimmed name,
/// summing their `mentions` and keeping the longest `description`;
/// relationships dedupe by `(from, to, type)`, duplicates dropped.
fn merge_results(per_chunk: Vec<ExtractionResult>) -> ExtractionResult {
    let mut entities: HashMap<String, GraphEntity> = HashMap::new();
    let mut relationships: HashMap<(String, String, String), GraphRelationship> = HashMap::new();

    for result in per_chunk {
        for entity in result.entities {
            let key = entity.name.trim().to_string();
            entities
                .entry(key)
                .and_modify(|existing| {
                    existing.mentions += entity.mentions;
                    if entity.description.len() > existing.description.len() {
                        existing.description = entity.description.clone();
                    }
                })
                .or_insert(entity);
        }
        for rel in result.relationships {
            let key = (
                rel.from_entity.trim().to_string(),
                rel.to_entity.trim().to_string(),
                rel.relationship_type.trim().to_uppercase(),
            );
            relationships.entry(key).or_insert(rel);
        }
    }

    ExtractionResult {
        entities: entities.into_values().collect(),
        relationships: relationships.into_values().collect(),
    }
}

/// Well-known programming languages, frameworks, and infra names the rule
/// fallback recognizes by exact (case-sensitive) match.
const KNOWN_TECH_TERMS: &[&str] = &[
    "Rust", "Python", "JavaScript", "TypeScript", "Go", "Java", "Ruby", "C++", "C#",
    "Docker", "Kubernetes", "PostgreSQL", "MySQL", "SQLite", "Redis", "MongoDB",
    "Neo4j", "Nginx", "React", "Vue", "Angular", "Node.js", "GraphQL", "gRPC",
    "Terraform", "AWS", "Azure", "GCP", "Linux",
];

/// Regex-based fallback used when no LLM is configured: known tech terms
/// and ALL_CAPS identifiers are tagged `Configuration` (mentions are exact
/// occurrence counts, no relationships are produced); capitalized
/// multi-word phrases round out coverage as `Concept` entities.
fn extract_with_rules(chunks: &[String]) -> ExtractionResult {
    let caps_re = Regex::new(r"\b[A-Z]{2,}\b").unwrap();
    let phrase_re = Regex::new(r"\b([A-Z][a-zA-Z0-9]*(?:\s[A-Z][a-zA-Z0-9]*){0,2})\b").unwrap();
    let mut entities: HashMap<String, GraphEntity> = HashMap::new();

    for chunk in chunks {
        let mut claimed: std::collections::HashSet<String> = std::collections::HashSet::new();

        for term in KNOWN_TECH_TERMS {
            let count = chunk.matches(term).count() as i64;
            if count == 0 {
                continue;
            }
            claimed.insert(term.to_string());
            entities
                .entry(term.to_string())
                .and_modify(|e| e.mentions += count)
                .or_insert(GraphEntity {
                    name: term.to_string(),
                    entity_type: "Configuration".to_string(),
                    description: String::new(),
                    mentions: count,
                });
        }

        for capture in caps_re.find_iter(chunk) {
            let name = capture.as_str().to_string();
            if !claimed.insert(name.clone()) {
                continue;
            }
            entities
                .entry(name.clone())
                .and_modify(|e| e.mentions += 1)
                .or_insert(GraphEntity {
                    name,
                    entity_type: "Configuration".to_string(),
                    description: String::new(),
                    mentions: 1,
                });
        }

        for capture in phrase_re.captures_iter(chunk) {
            let name = capture[1].trim().to_string();
            if name.len() < 3 || claimed.contains(&name) {
                continue;
            }
            entities
                .entry(name.clone())
                .and_modify(|e| e.mentions += 1)
                .or_insert(GraphEntity {
                    name,
                    entity_type: "Concept".to_string(),
                    description: String::new(),
                    mentions: 1,
                });
        }
    }

    ExtractionResult {
        entities: entities.into_values().collect(),
        relationships: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, desc: &str) -> GraphEntity {
        GraphEntity {
            name: name.to_string(),
            entity_type: "Concept".to_string(),
            description: desc.to_string(),
            mentions: 1,
        }
    }

    fn relationship(from: &str, to: &str, kind: &str) -> GraphRelationship {
        GraphRelationship {
            from_entity: from.to_string(),
            to_entity: to.to_string(),
            relationship_type: kind.to_string(),
            description: String::new(),
            confidence: 0.5,
        }
    }

    #[test]
    fn merge_dedupes_entities_keeping_longest_description() {
        let a = ExtractionResult {
            entities: vec![entity("Rust", "short")],
            relationships: vec![],
        };
        let b = ExtractionResult {
            entities: vec![entity("Rust", "a much longer description of rust")],
            relationships: vec![],
        };
        let merged = merge_results(vec![a, b]);
        assert_eq!(merged.entities.len(), 1);
        assert_eq!(merged.entities[0].description, "a much longer description of rust");
        assert_eq!(merged.entities[0].mentions, 2);
    }

    #[test]
    fn merge_dedupes_relationships_by_triple() {
        let a = ExtractionResult {
            entities: vec![],
            relationships: vec![relationship("Rust", "Cargo", "USES")],
        };
        let b = ExtractionResult {
            entities: vec![],
            relationships: vec![
                relationship("Rust", "Cargo", "USES"),
                relationship("Rust", "Cargo", "DEPENDS_ON"),
            ],
        };
        let merged = merge_results(vec![a, b]);
        assert_eq!(merged.relationships.len(), 2);
    }

    #[test]
    fn parse_extraction_json_handles_well_formed_payload() {
        let payload = r#"{
            "entities": [{"name": "Rust", "entity_type": "Technology", "description": "a language", "mentions": 3}],
            "relationships": [{"from_entity": "Rust", "to_entity": "Cargo", "relationship_type": "USES", "description": "", "confidence": 0.9}]
        }"#;
        let result = parse_extraction_json(payload).unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity_type, "Technology");
        assert_eq!(result.entities[0].mentions, 3);
        assert_eq!(result.relationships.len(), 1);
        assert!((result.relationships[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn parse_extraction_json_rejects_unknown_entity_type() {
        let payload = r#"{"entities": [{"name": "X", "entity_type": "Alien", "description": ""}], "relationships": []}"#;
        let result = parse_extraction_json(payload).unwrap();
        assert_eq!(result.entities[0].entity_type, "Concept");
        assert_eq!(result.entities[0].mentions, 1);
    }

    #[test]
    fn parse_extraction_json_resolves_entity_type_aliases() {
        let payload = r#"{"entities": [{"name": "Cargo", "entity_type": "Tool", "description": ""}], "relationships": []}"#;
        let result = parse_extraction_json(payload).unwrap();
        assert_eq!(result.entities[0].entity_type, "Technology");
    }

    #[test]
    fn rule_fallback_extracts_capitalized_phrases() {
        let chunks = vec!["The Rust Programming Language is great. it compiles fast.".to_string()];
        let result = extract_with_rules(&chunks);
        assert!(result.entities.iter().any(|e| e.name.contains("Rust")));
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn rule_fallback_tags_known_tech_terms_as_configuration() {
        let chunks = vec!["We deploy with Docker and Kubernetes on AWS.".to_string()];
        let result = extract_with_rules(&chunks);
        let docker = result.entities.iter().find(|e| e.name == "Docker").unwrap();
        assert_eq!(docker.entity_type, "Configuration");
    }

    #[test]
    fn rule_fallback_counts_repeated_mentions() {
        let chunks = vec!["Rust is fast. Rust is safe. Rust is fun.".to_string()];
        let result = extract_with_rules(&chunks);
        let rust = result.entities.iter().find(|e| e.name == "Rust").unwrap();
        assert_eq!(rust.mentions, 3);
    }

    #[test]
    fn system_prompt_names_every_canonical_label() {
        let prompt = system_prompt();
        for label in ENTITY_LABELS {
            assert!(prompt.contains(label), "missing entity label {label}");
        }
        for label in RELATIONSHIP_LABELS {
            assert!(prompt.contains(label), "missing relationship label {label}");
        }
    }
}

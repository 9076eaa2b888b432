//! Graph store gateway: a thin wrapper over a Neo4j connection providing
//! idempotent schema setup and MERGE-based (never-destructive) upserts for
//! documents, entities, and typed relationships.
//!
//! Every write here is best-effort: a failure is logged and reported back
//! as a zero count rather than propagated, so a graph outage degrades the
//! pipeline to vector-only retrieval instead of failing the crawl.

use neo4rs::{query, ConfigBuilder, Graph};

use crate::config::GraphConfig;
use crate::models::{GraphEntity, GraphRelationship, ENTITY_LABELS};

/// The closed set of relationship labels the graph recognizes. Anything an
/// extractor produces outside this set collapses to `RELATED_TO`.
pub const RELATIONSHIP_LABELS: &[&str] = &[
    "REQUIRES",
    "DEPENDS_ON",
    "USES",
    "IMPLEMENTS",
    "EXTENDS",
    "PART_OF",
    "CONFIGURES",
    "ENABLES",
    "PROVIDES",
    "ALTERNATIVE_TO",
    "SIMILAR_TO",
    "PREREQUISITE_FOR",
    "DOCUMENTED_IN",
    "RELATED_TO",
];

/// Normalize an extractor-produced relationship label against the closed
/// set (uppercased, spaces/dashes folded to underscores), collapsing any
/// unrecognized label to `RELATED_TO`.
pub fn normalize_relationship_label(label: &str) -> &'static str {
    let normalized = label
        .trim()
        .to_uppercase()
        .replace([' ', '-'], "_");
    RELATIONSHIP_LABELS
        .iter()
        .find(|&&known| known == normalized)
        .copied()
        .unwrap_or("RELATED_TO")
}

/// Map an extractor-produced entity type string onto one of the six
/// canonical entity labels. Exact (case-insensitive) matches to a
/// canonical label pass through; a small alias table covers common
/// synonyms an LLM might produce; anything else defaults to `Concept`.
pub fn resolve_entity_label(type_str: &str) -> &'static str {
    let trimmed = type_str.trim();
    if let Some(&label) = ENTITY_LABELS
        .iter()
        .find(|&&l| l.eq_ignore_ascii_case(trimmed))
    {
        return label;
    }
    match trimmed.to_lowercase().as_str() {
        "tool" | "framework" | "library" | "platform" | "service" | "language" | "database" => {
            "Technology"
        }
        "setting" | "parameter" | "option" | "flag" | "env var" | "environment variable" => {
            "Configuration"
        }
        "company" | "team" | "vendor" => "Organization",
        "author" | "developer" | "maintainer" | "contributor" => "Person",
        "package" | "crate" | "module" | "library artifact" => "Product",
        _ => "Concept",
    }
}

pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    pub async fn connect(config: &GraphConfig) -> anyhow::Result<Self> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .fetch_size(500)
            .max_connections(10)
            .build()
            .map_err(|e| anyhow::anyhow!("invalid graph store configuration: {e}"))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to graph store: {e}"))?;

        Ok(Self { graph })
    }

    /// Idempotent schema setup: uniqueness constraints on node ids, plus one
    /// constraint per canonical entity label (`name` is unique within a
    /// label, not globally — two variants may legitimately share a name).
    /// Safe to call on every startup.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let mut constraints = vec![
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (n:Document) REQUIRE n.id IS UNIQUE".to_string(),
            "CREATE CONSTRAINT source_id IF NOT EXISTS FOR (n:Source) REQUIRE n.source_id IS UNIQUE".to_string(),
        ];
        for label in ENTITY_LABELS {
            constraints.push(format!(
                "CREATE CONSTRAINT entity_{}_name IF NOT EXISTS FOR (n:{label}) REQUIRE n.name IS UNIQUE",
                label.to_lowercase(),
            ));
        }

        for c in constraints {
            self.graph
                .run(query(&c))
                .await
                .map_err(|e| anyhow::anyhow!("graph migration failed: {e}"))?;
        }

        Ok(())
    }

    /// MERGE a Document node and its membership in a Source, never
    /// overwriting fields set by an earlier crawl except `crawled_at`.
    pub async fn store_document(
        &self,
        document_id: &str,
        url: &str,
        title: Option<&str>,
        source_id: &str,
        crawled_at: i64,
    ) -> anyhow::Result<()> {
        let q = query(
            r#"
            MERGE (s:Source {source_id: $source_id})
            MERGE (d:Document {id: $id})
            ON CREATE SET d.url = $url, d.title = $title, d.crawled_at = $crawled_at
            ON MATCH SET d.title = $title, d.crawled_at = $crawled_at
            MERGE (d)-[:FROM_SOURCE]->(s)
            "#,
        )
        .param("id", document_id)
        .param("url", url)
        .param("title", title.unwrap_or(""))
        .param("source_id", source_id)
        .param("crawled_at", crawled_at);

        self.graph
            .run(q)
            .await
            .map_err(|e| anyhow::anyhow!("failed to store document node: {e}"))
    }

    /// MERGE each entity (under its resolved label) and its MENTIONS edge
    /// from the document. The entity's description is set only if
    /// previously unset; MENTIONS.count increments by the entity's
    /// supplied mention count, monotonically across crawls.
    pub async fn store_entities(&self, document_id: &str, entities: &[GraphEntity]) -> usize {
        let mut stored = 0usize;
        for entity in entities {
            let label = resolve_entity_label(&entity.entity_type);
            let mentions = entity.mentions.max(1);
            let cypher = format!(
                r#"
                MERGE (e:{label} {{name: $name}})
                ON CREATE SET e.description = $description, e.updated_at = $now
                ON MATCH SET e.description = CASE WHEN e.description IS NULL OR e.description = '' THEN $description ELSE e.description END,
                             e.updated_at = $now
                WITH e
                MATCH (d:Document {{id: $document_id}})
                MERGE (d)-[m:MENTIONS]->(e)
                ON CREATE SET m.count = $mentions, m.updated_at = $now
                ON MATCH SET m.count = m.count + $mentions, m.updated_at = $now
                "#
            );
            let q = query(&cypher)
                .param("name", entity.name.trim())
                .param("description", entity.description.as_str())
                .param("document_id", document_id)
                .param("mentions", mentions)
                .param("now", chrono::Utc::now().timestamp());

            match self.graph.run(q).await {
                Ok(_) => stored += 1,
                Err(e) => tracing::warn!(error = %e, entity = %entity.name, "failed to store entity, skipping"),
            }
        }
        stored
    }

    /// MERGE each relationship edge between two already-stored entities,
    /// normalizing the label against the closed relationship set and
    /// persisting the extractor's confidence score.
    pub async fn store_relationships(&self, relationships: &[GraphRelationship]) -> usize {
        let mut stored = 0usize;
        for rel in relationships {
            let label = normalize_relationship_label(&rel.relationship_type);
            let cypher = format!(
                r#"
                MATCH (a {{name: $from}}), (b {{name: $to}})
                MERGE (a)-[r:{label}]->(b)
                ON CREATE SET r.description = $description, r.confidence = $confidence, r.updated_at = $now
                ON MATCH SET r.description = $description, r.confidence = $confidence, r.updated_at = $now
                "#
            );
            let q = query(&cypher)
                .param("from", rel.from_entity.trim())
                .param("to", rel.to_entity.trim())
                .param("description", rel.description.as_str())
                .param("confidence", rel.confidence.clamp(0.0, 1.0))
                .param("now", chrono::Utc::now().timestamp());

            match self.graph.run(q).await {
                Ok(_) => stored += 1,
                Err(e) => tracing::warn!(
                    error = %e,
                    from = %rel.from_entity,
                    to = %rel.to_entity,
                    "failed to store relationship, skipping"
                ),
            }
        }
        stored
    }

    /// Fetch an entity's neighborhood out to `max_hops` edges, capped to
    /// `max_related` neighbors, plus the documents that mention it.
    pub async fn entity_context(
        &self,
        name: &str,
        max_hops: u32,
        max_related: usize,
    ) -> anyhow::Result<Option<EntityContext>> {
        let hops = max_hops.clamp(1, 5);
        let cypher = format!(
            r#"
            MATCH (e {{name: $name}})
            WHERE any(lbl IN labels(e) WHERE lbl IN $labels)
            OPTIONAL MATCH (e)-[*1..{hops}]-(other)
            WHERE any(lbl IN labels(other) WHERE lbl IN $labels) AND other.name <> e.name
            OPTIONAL MATCH (d:Document)-[:MENTIONS]->(e)
            RETURN e.description AS description,
                   labels(e) AS labels,
                   collect(DISTINCT other.name)[0..{max_related}] AS neighbors,
                   collect(DISTINCT d.id) AS mentioning_documents
            "#
        );
        let q = query(&cypher)
            .param("name", name.trim())
            .param("labels", ENTITY_LABELS.to_vec());

        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| anyhow::anyhow!("graph query failed: {e}"))?;

        if let Some(row) = stream
            .next()
            .await
            .map_err(|e| anyhow::anyhow!("graph query failed: {e}"))?
        {
            let description: Option<String> = row.get("description").ok();
            let labels: Vec<String> = row.get("labels").unwrap_or_default();
            let neighbors: Vec<String> = row.get("neighbors").unwrap_or_default();
            let mentioning_documents: Vec<String> = row.get("mentioning_documents").unwrap_or_default();

            Ok(Some(EntityContext {
                name: name.to_string(),
                entity_type: labels
                    .into_iter()
                    .find(|l| ENTITY_LABELS.contains(&l.as_str()))
                    .unwrap_or_else(|| "Concept".to_string()),
                description: description.unwrap_or_default(),
                neighbors,
                mentioning_documents,
            }))
        } else {
            Ok(None)
        }
    }

    /// Best-effort enrichment of a set of documents for `graphrag_query`:
    /// the top `max_entities` entities mentioned across the set (ordered by
    /// document-mentions-count descending), each with its 1-hop
    /// relationships, plus a pre-formatted markdown block ready to splice
    /// into an LLM context. Returns an empty enrichment on failure rather
    /// than erroring the whole retrieval.
    pub async fn enrich_documents(
        &self,
        document_ids: &[String],
        max_entities: usize,
    ) -> DocumentEnrichment {
        let cypher = r#"
            MATCH (d:Document)-[m:MENTIONS]->(e)
            WHERE d.id IN $ids AND any(lbl IN labels(e) WHERE lbl IN $labels)
            WITH e, sum(m.count) AS total_mentions
            ORDER BY total_mentions DESC
            LIMIT $max_entities
            OPTIONAL MATCH (e)-[r]-(related)
            WHERE any(lbl IN labels(related) WHERE lbl IN $labels)
            RETURN e.name AS name, labels(e) AS labels, e.description AS description,
                   total_mentions,
                   collect(DISTINCT {name: related.name, relationship: type(r)})[0..5] AS related
        "#;
        let q = query(cypher)
            .param("ids", document_ids.to_vec())
            .param("labels", ENTITY_LABELS.to_vec())
            .param("max_entities", max_entities as i64);

        let mut entities = Vec::new();
        match self.graph.execute(q).await {
            Ok(mut stream) => loop {
                match stream.next().await {
                    Ok(Some(row)) => {
                        let name: String = row.get("name").unwrap_or_default();
                        let labels: Vec<String> = row.get("labels").unwrap_or_default();
                        let description: String = row.get("description").unwrap_or_default();
                        let mentions: i64 = row.get("total_mentions").unwrap_or(0);
                        let related_maps: Vec<neo4rs::BoltMap> = row.get("related").unwrap_or_default();
                        let related: Vec<RelatedEntity> = related_maps
                            .iter()
                            .filter_map(|m| {
                                let name = m.get::<String>("name").ok()?;
                                let relationship = m.get::<String>("relationship").ok()?;
                                Some(RelatedEntity { name, relationship })
                            })
                            .collect();
                        entities.push(EnrichedEntity {
                            name,
                            entity_type: labels
                                .into_iter()
                                .find(|l| ENTITY_LABELS.contains(&l.as_str()))
                                .unwrap_or_else(|| "Concept".to_string()),
                            description,
                            mentions,
                            related,
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "graph enrichment row failed");
                        break;
                    }
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "graph enrichment query failed");
            }
        }

        let markdown = render_enrichment_markdown(&entities);
        DocumentEnrichment { entities, markdown }
    }

    /// Pass-through read query for `query_document_graph`: runs an
    /// arbitrary caller-supplied Cypher statement and returns each row as a
    /// JSON object keyed by column name. Read-only by convention (the tool
    /// boundary does not enforce it); failures are returned as errors
    /// rather than swallowed, since the caller wrote the query.
    pub async fn run_read_query(&self, cypher: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        let mut stream = self
            .graph
            .execute(query(cypher))
            .await
            .map_err(|e| anyhow::anyhow!("graph query failed: {e}"))?;

        let mut out = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| anyhow::anyhow!("graph query failed: {e}"))?
        {
            let mut obj = serde_json::Map::new();
            for key in row.keys() {
                let value: String = row
                    .get::<neo4rs::BoltType>(key)
                    .map(|v| format!("{v:?}"))
                    .unwrap_or_default();
                obj.insert(key.to_string(), serde_json::Value::String(value));
            }
            out.push(serde_json::Value::Object(obj));
        }
        Ok(out)
    }
}

/// Pre-formatted markdown block summarizing the entities enriching a
/// `graphrag_query` result, suitable to splice directly into an LLM
/// context window.
fn render_enrichment_markdown(entities: &[EnrichedEntity]) -> String {
    if entities.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Related entities\n\n");
    for entity in entities {
        out.push_str(&format!(
            "- **{}** ({}, mentioned {}x): {}\n",
            entity.name, entity.entity_type, entity.mentions, entity.description
        ));
    }
    out
}

/// Neighborhood snapshot for a single entity, returned by `get_entity_context`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntityContext {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub neighbors: Vec<String>,
    pub mentioning_documents: Vec<String>,
}

/// A single entity surfaced by [`GraphStore::enrich_documents`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrichedEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub mentions: i64,
    pub related: Vec<RelatedEntity>,
}

/// A neighboring entity one hop away from an [`EnrichedEntity`], with the
/// relationship label connecting them.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelatedEntity {
    pub name: String,
    pub relationship: String,
}

/// Result of [`GraphStore::enrich_documents`]: the top entities across a
/// document set plus a ready-to-splice markdown summary.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DocumentEnrichment {
    pub entities: Vec<EnrichedEntity>,
    pub markdown: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_pass_through() {
        assert_eq!(normalize_relationship_label("USES"), "USES");
        assert_eq!(normalize_relationship_label("uses"), "USES");
        assert_eq!(normalize_relationship_label("  Implements  "), "IMPLEMENTS");
    }

    #[test]
    fn unknown_label_collapses_to_related_to() {
        assert_eq!(normalize_relationship_label("FRIENDS_WITH"), "RELATED_TO");
        assert_eq!(normalize_relationship_label(""), "RELATED_TO");
    }

    #[test]
    fn spaces_and_dashes_fold_to_underscores() {
        assert_eq!(normalize_relationship_label("prerequisite-for"), "PREREQUISITE_FOR");
        assert_eq!(normalize_relationship_label("alternative to"), "ALTERNATIVE_TO");
    }

    #[test]
    fn canonical_entity_labels_pass_through_case_insensitively() {
        assert_eq!(resolve_entity_label("Technology"), "Technology");
        assert_eq!(resolve_entity_label("organization"), "Organization");
    }

    #[test]
    fn entity_alias_table_resolves_known_synonyms() {
        assert_eq!(resolve_entity_label("Tool"), "Technology");
        assert_eq!(resolve_entity_label("Framework"), "Technology");
        assert_eq!(resolve_entity_label("Library"), "Technology");
    }

    #[test]
    fn unknown_entity_type_defaults_to_concept() {
        assert_eq!(resolve_entity_label("Gadget"), "Concept");
    }

    #[test]
    fn enrichment_markdown_is_empty_for_no_entities() {
        assert_eq!(render_enrichment_markdown(&[]), "");
    }

    #[test]
    fn enrichment_markdown_lists_entities_with_mentions() {
        let entities = vec![EnrichedEntity {
            name: "Rust".to_string(),
            entity_type: "Technology".to_string(),
            description: "a systems language".to_string(),
            mentions: 4,
            related: vec![],
        }];
        let markdown = render_enrichment_markdown(&entities);
        assert!(markdown.contains("Rust"));
        assert!(markdown.contains("mentioned 4x"));
    }
}

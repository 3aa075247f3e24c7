//! Entity/relationship extraction capability interface.
//!
//! The [`Extractor`] trait maps a text segment to typed entities and
//! typed relations between them. Output is advisory: zero entities is a
//! valid result for boilerplate chunks, malformed model output degrades
//! to an empty extraction, and nothing an extractor returns ever causes
//! existing graph facts to be deleted.
//!
//! Also home to [`seed_terms`], the query-side tokenizer that picks
//! candidate seed terms for graph pattern queries.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::ExtractionConfig;
use crate::error::MeshError;
use crate::models::{EdgeType, NodeType};

/// An entity mention found in a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    pub node_type: NodeType,
}

/// A typed relation between two entities, referenced by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelation {
    pub source: String,
    pub edge_type: EdgeType,
    pub target: String,
}

/// The advisory fact set extracted from one chunk. No ordering
/// guarantee.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

/// Maps a text segment to typed entities and relations.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction, MeshError>;
}

/// Select an extractor from configuration.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Box<dyn Extractor>, MeshError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledExtractor)),
        "llm" => Ok(Box::new(LlmExtractor::new(config)?)),
        other => Err(MeshError::Config(format!(
            "unknown extraction provider '{}'",
            other
        ))),
    }
}

/// No-op extractor: every chunk yields zero facts. Documents still
/// reach `ready` with vector-only knowledge.
pub struct DisabledExtractor;

#[async_trait]
impl Extractor for DisabledExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction, MeshError> {
        Ok(Extraction::default())
    }
}

// ============ LLM extractor ============

/// Prompts an OpenAI-compatible chat-completions endpoint for a JSON
/// object of entities and relationships, then filters facts down to the
/// governed type sets. Unknown type tags drop that fact with a warning.
pub struct LlmExtractor {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl LlmExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, MeshError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| MeshError::Config("extraction.model required for llm provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| MeshError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MeshError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model,
            api_key,
            client,
        })
    }

    fn prompt(text: &str) -> String {
        format!(
            "Analyze the following text and extract entities and relationships. \
             Respond with only a JSON object of this shape:\n\
             {{\"entities\": [{{\"name\": \"...\", \"entity_type\": \
             \"company|process|goal|entity|concept\"}}], \
             \"relationships\": [{{\"source_entity\": \"...\", \
             \"relationship_type\": \"HAS_PROCESS|HAS_GOAL|MENTIONS|RELATES_TO|DEFINES\", \
             \"target_entity\": \"...\"}}]}}\n\n\
             Text to analyze:\n{}",
            text
        )
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, MeshError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": Self::prompt(text)}],
            "temperature": 0.0,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| MeshError::Transient(format!("extraction request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(MeshError::Transient(format!(
                "extraction API {}: {}",
                status, text
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MeshError::Capability(format!(
                "extraction API {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MeshError::Capability(format!("invalid extraction response: {}", e)))?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or("");

        Ok(parse_extraction(content))
    }
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelation>,
}

#[derive(Deserialize)]
struct RawEntity {
    name: String,
    entity_type: String,
}

#[derive(Deserialize)]
struct RawRelation {
    source_entity: String,
    relationship_type: String,
    target_entity: String,
}

/// Parse model output into a governed [`Extraction`]. Malformed JSON
/// yields an empty extraction rather than an error; facts with unknown
/// type tags or empty names are dropped individually.
pub fn parse_extraction(content: &str) -> Extraction {
    let stripped = strip_code_fence(content);
    let raw: RawExtraction = match serde_json::from_str(stripped) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "unparseable extraction output, treating as empty");
            return Extraction::default();
        }
    };

    let mut extraction = Extraction::default();

    for entity in raw.entities {
        if entity.name.trim().is_empty() {
            continue;
        }
        match NodeType::parse(&entity.entity_type) {
            // Extractors never produce document nodes; those are owned
            // by the ingestion pipeline.
            Some(NodeType::Document) | None => {
                warn!(entity_type = %entity.entity_type, name = %entity.name,
                      "dropping entity with ungoverned type");
            }
            Some(node_type) => extraction.entities.push(ExtractedEntity {
                name: entity.name,
                node_type,
            }),
        }
    }

    for relation in raw.relationships {
        if relation.source_entity.trim().is_empty() || relation.target_entity.trim().is_empty() {
            continue;
        }
        match EdgeType::parse(&relation.relationship_type) {
            Some(edge_type) => extraction.relations.push(ExtractedRelation {
                source: relation.source_entity,
                edge_type,
                target: relation.target_entity,
            }),
            None => {
                warn!(relationship_type = %relation.relationship_type,
                      "dropping relation with ungoverned type");
            }
        }
    }

    extraction
}

/// Models often wrap JSON in markdown fences; strip one layer if
/// present.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

// ============ Query seed terms ============

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "can", "what", "when", "where", "why", "how",
    "who", "which", "that", "this", "these", "those", "about", "our", "their", "its",
];

/// Extract candidate seed terms from a query: lowercase tokens with
/// stopwords and short words removed, deduplicated in order, capped at
/// five.
pub fn seed_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query.split(|c: char| !c.is_alphanumeric()) {
        let word = token.to_lowercase();
        if word.len() <= 2 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !terms.contains(&word) {
            terms.push(word);
        }
        if terms.len() == 5 {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extraction_valid() {
        let content = r#"{
            "entities": [
                {"name": "Acme Corp", "entity_type": "company"},
                {"name": "Onboarding", "entity_type": "process"}
            ],
            "relationships": [
                {"source_entity": "Acme Corp", "relationship_type": "HAS_PROCESS",
                 "target_entity": "Onboarding"}
            ]
        }"#;
        let extraction = parse_extraction(content);
        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.entities[0].node_type, NodeType::Company);
        assert_eq!(extraction.relations.len(), 1);
        assert_eq!(extraction.relations[0].edge_type, EdgeType::HasProcess);
    }

    #[test]
    fn test_parse_extraction_code_fenced() {
        let content = "```json\n{\"entities\": [{\"name\": \"Q3 Targets\", \"entity_type\": \"goal\"}], \"relationships\": []}\n```";
        let extraction = parse_extraction(content);
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].node_type, NodeType::Goal);
    }

    #[test]
    fn test_parse_extraction_malformed_is_empty() {
        let extraction = parse_extraction("I could not find any entities, sorry!");
        assert!(extraction.entities.is_empty());
        assert!(extraction.relations.is_empty());
    }

    #[test]
    fn test_parse_extraction_drops_ungoverned_types() {
        let content = r#"{
            "entities": [
                {"name": "Jane Doe", "entity_type": "person"},
                {"name": "Roadmap", "entity_type": "concept"}
            ],
            "relationships": [
                {"source_entity": "Jane Doe", "relationship_type": "EMPLOYS",
                 "target_entity": "Roadmap"}
            ]
        }"#;
        let extraction = parse_extraction(content);
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].name, "Roadmap");
        assert!(extraction.relations.is_empty());
    }

    #[test]
    fn test_parse_extraction_rejects_document_type() {
        let content = r#"{"entities": [{"name": "report.pdf", "entity_type": "document"}], "relationships": []}"#;
        assert!(parse_extraction(content).entities.is_empty());
    }

    #[test]
    fn test_seed_terms_filters_stopwords() {
        let terms = seed_terms("What are the quarterly goals for Acme?");
        assert_eq!(terms, vec!["quarterly", "goals", "acme"]);
    }

    #[test]
    fn test_seed_terms_dedup_and_cap() {
        let terms = seed_terms("sales sales pipeline revenue pipeline forecast churn retention expansion");
        assert_eq!(terms.len(), 5);
        assert_eq!(
            terms,
            vec!["sales", "pipeline", "revenue", "forecast", "churn"]
        );
    }

    #[test]
    fn test_seed_terms_empty_query() {
        assert!(seed_terms("of the and").is_empty());
        assert!(seed_terms("").is_empty());
    }
}

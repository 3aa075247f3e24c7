//! Core data models for the knowledge mesh.
//!
//! These types represent the documents, chunks, graph facts, and context
//! bundles that flow through the ingestion and retrieval pipeline. The
//! graph type tags are closed enums with stable string encodings so that
//! merges stay well-defined; property bags are string-keyed maps of
//! scalar values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

/// Lifecycle of a document within the ingestion pipeline.
///
/// `Processing` doubles as the per-document mutex: a second ingestion
/// request for a document already in `Processing` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MeshError> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(MeshError::Consistency(format!(
                "unknown document status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata supplied by the upload collaborator when a document is
/// accepted. Text extraction has already happened upstream.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub filename: String,
    pub content_type: String,
    pub byte_size: i64,
    pub corpus_id: String,
}

/// Normalized document row stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub corpus_id: String,
    pub filename: String,
    pub content_type: String,
    pub byte_size: i64,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub created_at: i64,
}

/// A contiguous, bounded-length slice of a document's text — the unit of
/// embedding and extraction. Immutable once created; a document's chunk
/// set is regenerated wholesale on reprocessing.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Character offset of the chunk's first char in the source text.
    pub start_char: i64,
    /// Character offset one past the chunk's last char.
    pub end_char: i64,
    /// Characters shared with the previous chunk (0 for the first).
    pub overlap_chars: i64,
}

/// Typed node tags. A `Document` node exists per document; all other
/// types are deduplicated by (corpus, type, normalized name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Company,
    Process,
    Goal,
    Entity,
    Concept,
    Document,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Company => "company",
            NodeType::Process => "process",
            NodeType::Goal => "goal",
            NodeType::Entity => "entity",
            NodeType::Concept => "concept",
            NodeType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "company" => Some(NodeType::Company),
            "process" => Some(NodeType::Process),
            "goal" => Some(NodeType::Goal),
            "entity" => Some(NodeType::Entity),
            "concept" => Some(NodeType::Concept),
            "document" => Some(NodeType::Document),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed, directed edge tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    HasProcess,
    HasGoal,
    HasDocument,
    Mentions,
    RelatesTo,
    Defines,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::HasProcess => "HAS_PROCESS",
            EdgeType::HasGoal => "HAS_GOAL",
            EdgeType::HasDocument => "HAS_DOCUMENT",
            EdgeType::Mentions => "MENTIONS",
            EdgeType::RelatesTo => "RELATES_TO",
            EdgeType::Defines => "DEFINES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HAS_PROCESS" => Some(EdgeType::HasProcess),
            "HAS_GOAL" => Some(EdgeType::HasGoal),
            "HAS_DOCUMENT" => Some(EdgeType::HasDocument),
            "MENTIONS" => Some(EdgeType::Mentions),
            "RELATES_TO" => Some(EdgeType::RelatesTo),
            "DEFINES" => Some(EdgeType::Defines),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar property value. Untagged so property bags serialize to plain
/// JSON objects in SQLite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// String-keyed map of scalar values attached to nodes and edges.
/// Merges are last-write-wins per key.
pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// The record of which document (and optionally chunk) a derived graph
/// fact originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub document_id: String,
    pub chunk_id: Option<String>,
}

/// A typed node in the graph index.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub corpus_id: String,
    pub node_type: NodeType,
    pub name: String,
    pub normalized_name: String,
    pub properties: PropertyBag,
}

/// A typed, directed edge in the graph index.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub corpus_id: String,
    pub edge_type: EdgeType,
    pub source_id: String,
    pub target_id: String,
    pub properties: PropertyBag,
}

/// Node and edge counts by type, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total_nodes: i64,
    pub total_edges: i64,
    pub nodes_by_type: Vec<(String, i64)>,
    pub edges_by_type: Vec<(String, i64)>,
}

/// A chunk returned from the vector index with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}

/// Minimal node reference inside a graph hit.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRef {
    pub id: String,
    pub node_type: NodeType,
    pub name: String,
}

/// A (node, edge, node) triple reachable from a seed term, with the hop
/// distance at which it was discovered (1 = direct seed match).
#[derive(Debug, Clone, Serialize)]
pub struct GraphHit {
    pub source: NodeRef,
    pub edge_id: String,
    pub edge_type: EdgeType,
    pub target: NodeRef,
    pub hops: u32,
}

/// Provenance attached to each item in a context bundle, so the
/// generation step can trace claims back to source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextSource {
    Chunk {
        document_id: String,
        chunk_id: String,
    },
    GraphFact {
        edge_id: String,
    },
}

/// One ordered text segment in the merged context payload.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub text: String,
    pub source: ContextSource,
}

/// The ranked, bounded set of text/fact snippets assembled for a query,
/// handed to a generation step. An empty bundle is a valid outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub query: String,
    pub vector_hits: Vec<VectorHit>,
    pub graph_hits: Vec<GraphHit>,
    pub items: Vec<ContextItem>,
    /// True when the character budget cut off additional candidates.
    pub truncated: bool,
}

impl ContextBundle {
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            vector_hits: Vec::new(),
            graph_hits: Vec::new(),
            items: Vec::new(),
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DocumentStatus::parse("indexed").is_err());
    }

    #[test]
    fn test_node_type_roundtrip() {
        for t in [
            NodeType::Company,
            NodeType::Process,
            NodeType::Goal,
            NodeType::Entity,
            NodeType::Concept,
            NodeType::Document,
        ] {
            assert_eq!(NodeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(NodeType::parse("person"), None);
    }

    #[test]
    fn test_edge_type_roundtrip() {
        for t in [
            EdgeType::HasProcess,
            EdgeType::HasGoal,
            EdgeType::HasDocument,
            EdgeType::Mentions,
            EdgeType::RelatesTo,
            EdgeType::Defines,
        ] {
            assert_eq!(EdgeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EdgeType::parse("COMPETES_WITH"), None);
    }

    #[test]
    fn test_property_bag_json_roundtrip() {
        let mut bag = PropertyBag::new();
        bag.insert("name".into(), PropertyValue::Text("Acme".into()));
        bag.insert("employees".into(), PropertyValue::Int(250));
        bag.insert("public".into(), PropertyValue::Bool(false));

        let json = serde_json::to_string(&bag).unwrap();
        let restored: PropertyBag = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, bag);
    }
}

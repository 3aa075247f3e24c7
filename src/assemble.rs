//! Query-time retrieval and context assembly.
//!
//! `ask` runs both retrieval channels and merges them into a bounded
//! [`ContextBundle`]: the query is embedded and matched against chunk
//! vectors, seed terms drive a bounded graph traversal, and the results
//! fold into an ordered item list under a character budget. Retrieval
//! degrades rather than fails: a down embedding service costs the
//! vector channel, an unmatched query yields an empty bundle.

use tracing::warn;

use crate::engine::KnowledgeEngine;
use crate::error::MeshError;
use crate::extract::seed_terms;
use crate::graph_store;
use crate::models::{ContextBundle, ContextItem, ContextSource, GraphHit, GraphStats, VectorHit};
use crate::retry::with_backoff;
use crate::vector_store;

impl KnowledgeEngine {
    /// Retrieve and assemble context for a query using the configured
    /// retrieval parameters.
    pub async fn ask(&self, query: &str, corpus_id: &str) -> Result<ContextBundle, MeshError> {
        let retrieval = self.config.retrieval.clone();
        self.assemble(query, corpus_id, retrieval.k_vector, retrieval.hop_depth)
            .await
    }

    /// Retrieve and assemble context with explicit channel parameters.
    pub async fn assemble(
        &self,
        query: &str,
        corpus_id: &str,
        k_vector: i64,
        hop_depth: u32,
    ) -> Result<ContextBundle, MeshError> {
        if query.trim().is_empty() {
            return Err(MeshError::Input("query is empty".into()));
        }

        let vector_hits = match with_backoff(&self.config.retry, "embed query", || {
            let embedder = self.embedder.clone();
            let texts = vec![query.to_string()];
            async move { embedder.embed(&texts).await }
        })
        .await
        {
            Ok(vectors) => {
                vector_store::query(self.pool(), &vectors[0], k_vector, corpus_id).await?
            }
            Err(err) => {
                warn!(error = %err, "query embedding failed, vector channel degraded to empty");
                Vec::new()
            }
        };

        let seeds = seed_terms(query);
        let graph_hits = graph_store::query_pattern(
            self.pool(),
            corpus_id,
            &seeds,
            hop_depth,
            self.config.retrieval.max_graph_results,
        )
        .await?;

        Ok(merge_bundle(
            query,
            vector_hits,
            graph_hits,
            self.config.retrieval.context_budget_chars,
        ))
    }

    /// Node and edge counts by type, across all corpora or one.
    pub async fn graph_stats(&self, corpus_id: Option<&str>) -> Result<GraphStats, MeshError> {
        graph_store::stats(self.pool(), corpus_id).await
    }

    /// Direct graph lookup from explicit seed terms.
    pub async fn graph_query(
        &self,
        corpus_id: &str,
        seeds: &[String],
        hops: u32,
    ) -> Result<Vec<GraphHit>, MeshError> {
        let normalized: Vec<String> = seeds
            .iter()
            .map(|s| graph_store::normalize_name(s))
            .filter(|s| !s.is_empty())
            .collect();
        graph_store::query_pattern(
            self.pool(),
            corpus_id,
            &normalized,
            hops,
            self.config.retrieval.max_graph_results,
        )
        .await
    }
}

/// Render a graph triple as a single context line.
fn render_fact(hit: &GraphHit) -> String {
    format!(
        "{} -{}-> {}",
        hit.source.name,
        hit.edge_type.as_str(),
        hit.target.name
    )
}

/// Fold both channels into an ordered item list under `budget_chars`.
///
/// Chunk texts go first in score order, then graph facts by hop
/// distance. Each channel stops at its first candidate that would
/// overflow the budget, which sets the `truncated` flag. The raw channel
/// results are carried on the bundle untrimmed.
pub fn merge_bundle(
    query: &str,
    vector_hits: Vec<VectorHit>,
    graph_hits: Vec<GraphHit>,
    budget_chars: usize,
) -> ContextBundle {
    let mut items: Vec<ContextItem> = Vec::new();
    let mut used = 0usize;
    let mut truncated = false;

    for hit in &vector_hits {
        let len = hit.text.chars().count();
        if used + len > budget_chars {
            truncated = true;
            break;
        }
        used += len;
        items.push(ContextItem {
            text: hit.text.clone(),
            source: ContextSource::Chunk {
                document_id: hit.document_id.clone(),
                chunk_id: hit.chunk_id.clone(),
            },
        });
    }

    for hit in &graph_hits {
        let text = render_fact(hit);
        let len = text.chars().count();
        if used + len > budget_chars {
            truncated = true;
            break;
        }
        used += len;
        items.push(ContextItem {
            text,
            source: ContextSource::GraphFact {
                edge_id: hit.edge_id.clone(),
            },
        });
    }

    ContextBundle {
        query: query.to_string(),
        vector_hits,
        graph_hits,
        items,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeType, NodeRef, NodeType};

    fn vector_hit(chunk_id: &str, text: &str, score: f64) -> VectorHit {
        VectorHit {
            chunk_id: chunk_id.to_string(),
            document_id: "doc1".to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score,
        }
    }

    fn graph_hit(edge_id: &str, source: &str, target: &str, hops: u32) -> GraphHit {
        GraphHit {
            source: NodeRef {
                id: format!("{}-s", edge_id),
                node_type: NodeType::Company,
                name: source.to_string(),
            },
            edge_id: edge_id.to_string(),
            edge_type: EdgeType::Mentions,
            target: NodeRef {
                id: format!("{}-t", edge_id),
                node_type: NodeType::Concept,
                name: target.to_string(),
            },
            hops,
        }
    }

    #[test]
    fn test_merge_vector_items_precede_graph_facts() {
        let bundle = merge_bundle(
            "q",
            vec![vector_hit("c1", "chunk text", 0.9)],
            vec![graph_hit("e1", "Acme", "Churn", 1)],
            1000,
        );
        assert_eq!(bundle.items.len(), 2);
        assert!(matches!(bundle.items[0].source, ContextSource::Chunk { .. }));
        assert!(matches!(bundle.items[1].source, ContextSource::GraphFact { .. }));
        assert_eq!(bundle.items[1].text, "Acme -MENTIONS-> Churn");
        assert!(!bundle.truncated);
    }

    #[test]
    fn test_merge_respects_budget_and_flags_truncation() {
        let bundle = merge_bundle(
            "q",
            vec![
                vector_hit("c1", &"a".repeat(50), 0.9),
                vector_hit("c2", &"b".repeat(80), 0.8),
            ],
            vec![],
            100,
        );
        assert_eq!(bundle.items.len(), 1);
        assert!(bundle.truncated);
        // Channel results are carried whole regardless of the cut.
        assert_eq!(bundle.vector_hits.len(), 2);
    }

    #[test]
    fn test_merge_graph_facts_fill_remaining_budget() {
        let bundle = merge_bundle(
            "q",
            vec![vector_hit("c1", &"a".repeat(90), 0.9)],
            vec![graph_hit("e1", "A", "B", 1), graph_hit("e2", "C", "D", 1)],
            105,
        );
        // 90 used; "A -MENTIONS-> B" is 15 chars, fits exactly; the
        // second fact does not.
        assert_eq!(bundle.items.len(), 2);
        assert!(bundle.truncated);
    }

    #[test]
    fn test_merge_empty_channels_is_empty_bundle() {
        let bundle = merge_bundle("q", vec![], vec![], 100);
        assert!(bundle.is_empty());
        assert!(!bundle.truncated);
    }
}

//! Typed knowledge graph over SQLite.
//!
//! Nodes are deduplicated by `(corpus, type, normalized name)` and edges
//! by `(type, source, target)`; repeating an upsert merges properties
//! last-write-wins and accumulates provenance instead of creating a
//! duplicate. Fact removal is provenance-driven: deleting a document
//! drops only the facts no surviving document still supports.

use std::collections::{HashMap, HashSet};

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::MeshError;
use crate::models::{
    EdgeType, GraphHit, GraphNode, GraphStats, NodeRef, NodeType, PropertyBag, Provenance,
};

/// Canonical form of a node name for dedup: lowercased, trimmed, runs of
/// whitespace collapsed to single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn serialize_props(props: &PropertyBag) -> Result<String, MeshError> {
    serde_json::to_string(props)
        .map_err(|e| MeshError::Consistency(format!("unserializable property bag: {}", e)))
}

fn deserialize_props(json: &str) -> PropertyBag {
    serde_json::from_str(json).unwrap_or_default()
}

/// Insert or merge a node, returning its id.
///
/// An existing node with the same `(corpus, type, normalized name)` key
/// absorbs the new properties key-by-key (new values win) and gains a
/// provenance row; a fresh node gets a new uuid. The upsert is a single
/// atomic statement, so concurrent ingestion runs asserting the same
/// entity converge on one node without snapshot conflicts.
pub async fn upsert_node(
    pool: &SqlitePool,
    corpus_id: &str,
    node_type: NodeType,
    name: &str,
    props: &PropertyBag,
    prov: &Provenance,
) -> Result<String, MeshError> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Err(MeshError::Consistency("node name is empty".into()));
    }

    // json_patch gives per-key last-write-wins over the flat bags we
    // store. The first writer's display name wins.
    sqlx::query(
        "INSERT INTO graph_nodes (id, corpus_id, node_type, name, normalized_name, properties)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(corpus_id, node_type, normalized_name) DO UPDATE SET
            properties = json_patch(graph_nodes.properties, excluded.properties)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(corpus_id)
    .bind(node_type.as_str())
    .bind(name)
    .bind(&normalized)
    .bind(serialize_props(props)?)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id FROM graph_nodes
         WHERE corpus_id = ? AND node_type = ? AND normalized_name = ?",
    )
    .bind(corpus_id)
    .bind(node_type.as_str())
    .bind(&normalized)
    .fetch_one(pool)
    .await?;
    let node_id: String = row.get("id");

    // chunk_id is stored as '' for document-level provenance so the
    // uniqueness constraint holds (NULLs never compare equal).
    sqlx::query(
        "INSERT OR IGNORE INTO node_provenance (node_id, document_id, chunk_id) VALUES (?, ?, ?)",
    )
    .bind(&node_id)
    .bind(&prov.document_id)
    .bind(prov.chunk_id.clone().unwrap_or_default())
    .execute(pool)
    .await?;

    Ok(node_id)
}

/// Insert or merge a directed edge between two existing nodes, returning
/// its id. Dedup key is `(type, source, target)`.
pub async fn upsert_edge(
    pool: &SqlitePool,
    corpus_id: &str,
    edge_type: EdgeType,
    source_id: &str,
    target_id: &str,
    props: &PropertyBag,
    prov: &Provenance,
) -> Result<String, MeshError> {
    for endpoint in [source_id, target_id] {
        let found = sqlx::query("SELECT 1 FROM graph_nodes WHERE id = ?")
            .bind(endpoint)
            .fetch_optional(pool)
            .await?;
        if found.is_none() {
            return Err(MeshError::Consistency(format!(
                "edge endpoint {} does not exist",
                endpoint
            )));
        }
    }

    sqlx::query(
        "INSERT INTO graph_edges (id, corpus_id, edge_type, source_id, target_id, properties)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(edge_type, source_id, target_id) DO UPDATE SET
            properties = json_patch(graph_edges.properties, excluded.properties)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(corpus_id)
    .bind(edge_type.as_str())
    .bind(source_id)
    .bind(target_id)
    .bind(serialize_props(props)?)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id FROM graph_edges
         WHERE edge_type = ? AND source_id = ? AND target_id = ?",
    )
    .bind(edge_type.as_str())
    .bind(source_id)
    .bind(target_id)
    .fetch_one(pool)
    .await?;
    let edge_id: String = row.get("id");

    sqlx::query(
        "INSERT OR IGNORE INTO edge_provenance (edge_id, document_id, chunk_id) VALUES (?, ?, ?)",
    )
    .bind(&edge_id)
    .bind(&prov.document_id)
    .bind(prov.chunk_id.clone().unwrap_or_default())
    .execute(pool)
    .await?;

    Ok(edge_id)
}

/// Look up a non-document node by name within a corpus.
pub async fn resolve_node(
    pool: &SqlitePool,
    corpus_id: &str,
    name: &str,
) -> Result<Option<String>, MeshError> {
    let normalized = normalize_name(name);
    let row = sqlx::query(
        "SELECT id FROM graph_nodes
         WHERE corpus_id = ? AND normalized_name = ? AND node_type != 'document'
         ORDER BY rowid ASC LIMIT 1",
    )
    .bind(corpus_id)
    .bind(&normalized)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("id")))
}

/// Fetch a node with its full property bag.
pub async fn get_node(pool: &SqlitePool, node_id: &str) -> Result<Option<GraphNode>, MeshError> {
    let row = sqlx::query(
        "SELECT id, corpus_id, node_type, name, normalized_name, properties
         FROM graph_nodes WHERE id = ?",
    )
    .bind(node_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        let type_str: String = r.get("node_type");
        let node_type = NodeType::parse(&type_str).ok_or_else(|| {
            MeshError::Consistency(format!("unknown node type '{}' in store", type_str))
        })?;
        Ok(GraphNode {
            id: r.get("id"),
            corpus_id: r.get("corpus_id"),
            node_type,
            name: r.get("name"),
            normalized_name: r.get("normalized_name"),
            properties: deserialize_props(r.get("properties")),
        })
    })
    .transpose()
}

/// Find triples reachable from seed terms by bounded traversal.
///
/// Seed nodes are those whose normalized name contains any seed term;
/// edges incident to the frontier are reported at the hop they are first
/// reached, and the far endpoints join the next frontier. Results are
/// ordered by hop distance then edge id, capped at `limit`. Unknown
/// seeds simply match nothing.
///
/// Unlike the vector channel, this does not filter on document status:
/// a fact exists in the graph from the moment its provenance row is
/// written, even while the supporting document is still `processing`.
pub async fn query_pattern(
    pool: &SqlitePool,
    corpus_id: &str,
    seed_terms: &[String],
    max_hops: u32,
    limit: usize,
) -> Result<Vec<GraphHit>, MeshError> {
    if seed_terms.is_empty() || max_hops == 0 || limit == 0 {
        return Ok(Vec::new());
    }

    // The whole corpus subgraph is loaded once; traversal happens in
    // memory, matching the brute-force posture of the vector side.
    let node_rows = sqlx::query(
        "SELECT id, node_type, name, normalized_name FROM graph_nodes WHERE corpus_id = ?",
    )
    .bind(corpus_id)
    .fetch_all(pool)
    .await?;

    let mut nodes: HashMap<String, NodeRef> = HashMap::new();
    let mut frontier: Vec<String> = Vec::new();
    for row in &node_rows {
        let id: String = row.get("id");
        let type_str: String = row.get("node_type");
        let node_type = NodeType::parse(&type_str).ok_or_else(|| {
            MeshError::Consistency(format!("unknown node type '{}' in store", type_str))
        })?;
        let normalized: String = row.get("normalized_name");
        if seed_terms.iter().any(|term| normalized.contains(term.as_str())) {
            frontier.push(id.clone());
        }
        nodes.insert(
            id.clone(),
            NodeRef {
                id,
                node_type,
                name: row.get("name"),
            },
        );
    }
    if frontier.is_empty() {
        return Ok(Vec::new());
    }

    let edge_rows = sqlx::query(
        "SELECT id, edge_type, source_id, target_id FROM graph_edges WHERE corpus_id = ?",
    )
    .bind(corpus_id)
    .fetch_all(pool)
    .await?;

    struct EdgeRow {
        id: String,
        edge_type: EdgeType,
        source_id: String,
        target_id: String,
    }
    let mut edges = Vec::with_capacity(edge_rows.len());
    for row in &edge_rows {
        let type_str: String = row.get("edge_type");
        let edge_type = EdgeType::parse(&type_str).ok_or_else(|| {
            MeshError::Consistency(format!("unknown edge type '{}' in store", type_str))
        })?;
        edges.push(EdgeRow {
            id: row.get("id"),
            edge_type,
            source_id: row.get("source_id"),
            target_id: row.get("target_id"),
        });
    }

    let mut visited_nodes: HashSet<String> = frontier.iter().cloned().collect();
    let mut visited_edges: HashSet<String> = HashSet::new();
    let mut hits: Vec<GraphHit> = Vec::new();

    for hop in 1..=max_hops {
        if frontier.is_empty() {
            break;
        }
        let frontier_set: HashSet<&str> = frontier.iter().map(String::as_str).collect();
        let mut next_frontier: Vec<String> = Vec::new();

        for edge in &edges {
            if visited_edges.contains(&edge.id) {
                continue;
            }
            let touches_source = frontier_set.contains(edge.source_id.as_str());
            let touches_target = frontier_set.contains(edge.target_id.as_str());
            if !touches_source && !touches_target {
                continue;
            }

            let (source, target) = match (nodes.get(&edge.source_id), nodes.get(&edge.target_id)) {
                (Some(s), Some(t)) => (s.clone(), t.clone()),
                _ => continue,
            };
            visited_edges.insert(edge.id.clone());
            hits.push(GraphHit {
                source,
                edge_id: edge.id.clone(),
                edge_type: edge.edge_type,
                target,
                hops: hop,
            });

            for far in [&edge.source_id, &edge.target_id] {
                if visited_nodes.insert(far.clone()) {
                    next_frontier.push(far.clone());
                }
            }
        }

        frontier = next_frontier;
    }

    hits.sort_by(|a, b| a.hops.cmp(&b.hops).then_with(|| a.edge_id.cmp(&b.edge_id)));
    hits.truncate(limit);
    Ok(hits)
}

/// Node and edge counts, grouped by type.
pub async fn stats(pool: &SqlitePool, corpus_id: Option<&str>) -> Result<GraphStats, MeshError> {
    let (node_rows, edge_rows) = match corpus_id {
        Some(corpus) => (
            sqlx::query(
                "SELECT node_type, COUNT(*) AS n FROM graph_nodes
                 WHERE corpus_id = ? GROUP BY node_type ORDER BY node_type",
            )
            .bind(corpus)
            .fetch_all(pool)
            .await?,
            sqlx::query(
                "SELECT edge_type, COUNT(*) AS n FROM graph_edges
                 WHERE corpus_id = ? GROUP BY edge_type ORDER BY edge_type",
            )
            .bind(corpus)
            .fetch_all(pool)
            .await?,
        ),
        None => (
            sqlx::query(
                "SELECT node_type, COUNT(*) AS n FROM graph_nodes
                 GROUP BY node_type ORDER BY node_type",
            )
            .fetch_all(pool)
            .await?,
            sqlx::query(
                "SELECT edge_type, COUNT(*) AS n FROM graph_edges
                 GROUP BY edge_type ORDER BY edge_type",
            )
            .fetch_all(pool)
            .await?,
        ),
    };

    let nodes_by_type: Vec<(String, i64)> = node_rows
        .iter()
        .map(|r| (r.get("node_type"), r.get("n")))
        .collect();
    let edges_by_type: Vec<(String, i64)> = edge_rows
        .iter()
        .map(|r| (r.get("edge_type"), r.get("n")))
        .collect();

    Ok(GraphStats {
        total_nodes: nodes_by_type.iter().map(|(_, n)| n).sum(),
        total_edges: edges_by_type.iter().map(|(_, n)| n).sum(),
        nodes_by_type,
        edges_by_type,
    })
}

/// Withdraw one document's support from the graph.
///
/// Drops the document's provenance rows, then removes edges with no
/// remaining provenance and nodes with neither provenance nor incident
/// edges. Facts another document also asserted survive.
pub async fn delete_by_document(pool: &SqlitePool, document_id: &str) -> Result<(), MeshError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM node_provenance WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM edge_provenance WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "DELETE FROM graph_edges
         WHERE id NOT IN (SELECT edge_id FROM edge_provenance)",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM graph_nodes
         WHERE id NOT IN (SELECT node_id FROM node_provenance)
           AND id NOT IN (SELECT source_id FROM graph_edges)
           AND id NOT IN (SELECT target_id FROM graph_edges)",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

//! Database statistics and health overview.
//!
//! A quick summary of what's indexed: documents by lifecycle status,
//! chunk and embedding coverage, and graph size by type. Used by
//! `kmesh stats` to confirm ingestion runs are doing what they should.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::graph_store;
use crate::migrate;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;

    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;

    let status_rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM documents GROUP BY status ORDER BY status",
    )
    .fetch_all(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Knowledge Mesh — Database Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    for row in &status_rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        println!("    {:<10} {}", status, n);
    }
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );

    let graph = graph_store::stats(&pool, None).await?;
    println!();
    println!("  Graph nodes: {}", graph.total_nodes);
    for (node_type, n) in &graph.nodes_by_type {
        println!("    {:<10} {}", node_type, n);
    }
    println!("  Graph edges: {}", graph.total_edges);
    for (edge_type, n) in &graph.edges_by_type {
        println!("    {:<12} {}", edge_type, n);
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

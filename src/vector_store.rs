//! Chunk vector storage and brute-force similarity search over SQLite.
//!
//! Vectors live in the `chunk_vectors` table as little-endian f32 BLOBs,
//! one row per chunk. Query-time scoring is a full scan with cosine
//! similarity computed in Rust, which is plenty for the corpus sizes
//! this store targets.

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::MeshError;
use crate::models::{Chunk, VectorHit};

/// Record metadata stored alongside each embedding.
pub struct VectorRecord<'a> {
    pub chunk: &'a Chunk,
    pub corpus_id: &'a str,
    pub content_type: &'a str,
    pub model: &'a str,
}

/// Insert or replace the vector for a chunk. Each chunk has at most one
/// vector row; reprocessing replaces in place.
pub async fn upsert_vector(
    pool: &SqlitePool,
    record: &VectorRecord<'_>,
    embedding: &[f32],
) -> Result<(), MeshError> {
    sqlx::query(
        "INSERT INTO chunk_vectors
            (chunk_id, document_id, chunk_index, corpus_id, content_type, embedding, model, dims)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            chunk_index = excluded.chunk_index,
            corpus_id = excluded.corpus_id,
            content_type = excluded.content_type,
            embedding = excluded.embedding,
            model = excluded.model,
            dims = excluded.dims",
    )
    .bind(&record.chunk.id)
    .bind(&record.chunk.document_id)
    .bind(record.chunk.chunk_index)
    .bind(record.corpus_id)
    .bind(record.content_type)
    .bind(vec_to_blob(embedding))
    .bind(record.model)
    .bind(embedding.len() as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Score every stored vector in the corpus against `query_vec` and
/// return the top `k` by cosine similarity.
///
/// Only chunks whose document is `ready` are candidates; an empty index
/// yields an empty result, never an error. Ties break toward the older
/// row for deterministic output.
pub async fn query(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: i64,
    corpus_id: &str,
) -> Result<Vec<VectorHit>, MeshError> {
    let rows = sqlx::query(
        "SELECT v.chunk_id, v.document_id, v.chunk_index, v.embedding, c.text
         FROM chunk_vectors v
         JOIN documents d ON d.id = v.document_id AND d.status = 'ready'
         JOIN chunks c ON c.id = v.chunk_id
         WHERE v.corpus_id = ?
         ORDER BY v.rowid ASC",
    )
    .bind(corpus_id)
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<VectorHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            VectorHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score: cosine_similarity(query_vec, &stored) as f64,
            }
        })
        .collect();

    // Stable sort preserves rowid order among equal scores.
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k.max(0) as usize);
    Ok(hits)
}

/// Remove the vector for a single chunk.
pub async fn delete_chunk(pool: &SqlitePool, chunk_id: &str) -> Result<bool, MeshError> {
    let result = sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
        .bind(chunk_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every vector belonging to a document.
pub async fn delete_by_document(pool: &SqlitePool, document_id: &str) -> Result<u64, MeshError> {
    let result = sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Count stored vectors, optionally scoped to one corpus.
pub async fn count(pool: &SqlitePool, corpus_id: Option<&str>) -> Result<i64, MeshError> {
    let row = match corpus_id {
        Some(corpus) => {
            sqlx::query("SELECT COUNT(*) AS n FROM chunk_vectors WHERE corpus_id = ?")
                .bind(corpus)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT COUNT(*) AS n FROM chunk_vectors")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(row.get("n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;
    use crate::migrate::run_migrations;
    use crate::models::Chunk;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("mesh.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    fn chunk(id: &str, doc: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            chunk_index: index,
            text: text.to_string(),
            start_char: 0,
            end_char: text.chars().count() as i64,
            overlap_chars: 0,
        }
    }

    async fn insert_doc(pool: &SqlitePool, id: &str, status: &str) {
        sqlx::query(
            "INSERT INTO documents
                (id, corpus_id, filename, content_type, byte_size, status, body, created_at)
             VALUES (?, 'corp', 'f.txt', 'text/plain', 1, ?, 'x', 0)",
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_chunk_with_vector(pool: &SqlitePool, chunk: &Chunk, vec: &[f32]) {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, start_char, end_char, overlap_chars)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(chunk.start_char)
        .bind(chunk.end_char)
        .bind(chunk.overlap_chars)
        .execute(pool)
        .await
        .unwrap();

        let record = VectorRecord {
            chunk,
            corpus_id: "corp",
            content_type: "text/plain",
            model: "hash-v1",
        };
        upsert_vector(pool, &record, vec).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let (_dir, pool) = test_pool().await;
        insert_doc(&pool, "doc1", "ready").await;

        insert_chunk_with_vector(&pool, &chunk("c1", "doc1", 0, "north"), &[1.0, 0.0]).await;
        insert_chunk_with_vector(&pool, &chunk("c2", "doc1", 1, "east"), &[0.0, 1.0]).await;
        insert_chunk_with_vector(&pool, &chunk("c3", "doc1", 2, "northeast"), &[0.7, 0.7]).await;

        let hits = query(&pool, &[1.0, 0.0], 2, "corp").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[1].chunk_id, "c3");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_query_skips_non_ready_documents() {
        let (_dir, pool) = test_pool().await;
        insert_doc(&pool, "doc1", "ready").await;
        insert_doc(&pool, "doc2", "processing").await;

        insert_chunk_with_vector(&pool, &chunk("c1", "doc1", 0, "visible"), &[1.0, 0.0]).await;
        insert_chunk_with_vector(&pool, &chunk("c2", "doc2", 0, "hidden"), &[1.0, 0.0]).await;

        let hits = query(&pool, &[1.0, 0.0], 10, "corp").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_query_empty_index_yields_empty() {
        let (_dir, pool) = test_pool().await;
        let hits = query(&pool, &[1.0, 0.0], 5, "corp").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_vector() {
        let (_dir, pool) = test_pool().await;
        insert_doc(&pool, "doc1", "ready").await;

        let c = chunk("c1", "doc1", 0, "text");
        insert_chunk_with_vector(&pool, &c, &[1.0, 0.0]).await;

        let record = VectorRecord {
            chunk: &c,
            corpus_id: "corp",
            content_type: "text/plain",
            model: "hash-v1",
        };
        upsert_vector(&pool, &record, &[0.0, 1.0]).await.unwrap();

        assert_eq!(count(&pool, Some("corp")).await.unwrap(), 1);
        let hits = query(&pool, &[0.0, 1.0], 1, "corp").await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let (_dir, pool) = test_pool().await;
        insert_doc(&pool, "doc1", "ready").await;
        insert_doc(&pool, "doc2", "ready").await;

        insert_chunk_with_vector(&pool, &chunk("c1", "doc1", 0, "a"), &[1.0, 0.0]).await;
        insert_chunk_with_vector(&pool, &chunk("c2", "doc2", 0, "b"), &[0.0, 1.0]).await;

        assert_eq!(delete_by_document(&pool, "doc1").await.unwrap(), 1);
        assert_eq!(count(&pool, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_chunk() {
        let (_dir, pool) = test_pool().await;
        insert_doc(&pool, "doc1", "ready").await;
        insert_chunk_with_vector(&pool, &chunk("c1", "doc1", 0, "a"), &[1.0, 0.0]).await;

        assert!(delete_chunk(&pool, "c1").await.unwrap());
        assert!(!delete_chunk(&pool, "c1").await.unwrap());
        assert_eq!(count(&pool, None).await.unwrap(), 0);
    }
}

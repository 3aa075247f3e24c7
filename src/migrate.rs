//! Schema creation.
//!
//! Every statement is `IF NOT EXISTS`, so running migrations against an
//! already-initialized database is a no-op.

use sqlx::SqlitePool;

use crate::error::MeshError;

const STATEMENTS: &[&str] = &[
    // Documents keep their extracted text in `body` so reprocessing
    // never needs the original upload.
    "CREATE TABLE IF NOT EXISTS documents (
        id           TEXT PRIMARY KEY,
        corpus_id    TEXT NOT NULL,
        filename     TEXT NOT NULL,
        content_type TEXT NOT NULL,
        byte_size    INTEGER NOT NULL,
        status       TEXT NOT NULL,
        error        TEXT,
        body         TEXT NOT NULL,
        created_at   INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chunks (
        id            TEXT PRIMARY KEY,
        document_id   TEXT NOT NULL,
        chunk_index   INTEGER NOT NULL,
        text          TEXT NOT NULL,
        start_char    INTEGER NOT NULL,
        end_char      INTEGER NOT NULL,
        overlap_chars INTEGER NOT NULL,
        UNIQUE(document_id, chunk_index)
    )",
    // One vector per chunk; replace-on-conflict keeps that invariant
    // under reprocessing.
    "CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id     TEXT PRIMARY KEY,
        document_id  TEXT NOT NULL,
        chunk_index  INTEGER NOT NULL,
        corpus_id    TEXT NOT NULL,
        content_type TEXT NOT NULL,
        embedding    BLOB NOT NULL,
        model        TEXT NOT NULL,
        dims         INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS graph_nodes (
        id              TEXT PRIMARY KEY,
        corpus_id       TEXT NOT NULL,
        node_type       TEXT NOT NULL,
        name            TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        properties      TEXT NOT NULL DEFAULT '{}',
        UNIQUE(corpus_id, node_type, normalized_name)
    )",
    "CREATE TABLE IF NOT EXISTS graph_edges (
        id         TEXT PRIMARY KEY,
        corpus_id  TEXT NOT NULL,
        edge_type  TEXT NOT NULL,
        source_id  TEXT NOT NULL,
        target_id  TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        UNIQUE(edge_type, source_id, target_id)
    )",
    "CREATE TABLE IF NOT EXISTS node_provenance (
        node_id     TEXT NOT NULL,
        document_id TEXT NOT NULL,
        chunk_id    TEXT,
        UNIQUE(node_id, document_id, chunk_id)
    )",
    "CREATE TABLE IF NOT EXISTS edge_provenance (
        edge_id     TEXT NOT NULL,
        document_id TEXT NOT NULL,
        chunk_id    TEXT,
        UNIQUE(edge_id, document_id, chunk_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_corpus_status ON documents(corpus_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_corpus ON chunk_vectors(corpus_id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_nodes_lookup ON graph_nodes(corpus_id, normalized_name)",
    "CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id)",
    "CREATE INDEX IF NOT EXISTS idx_node_provenance_doc ON node_provenance(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_edge_provenance_doc ON edge_provenance(document_id)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), MeshError> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

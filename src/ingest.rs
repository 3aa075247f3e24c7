//! Document ingestion pipeline.
//!
//! Submission records a document and its extracted text; processing
//! turns that text into chunks, vectors, and graph facts. The pipeline
//! is deliberately restartable: processing begins by invalidating any
//! artifacts from a previous run, so reprocessing a document converges
//! to the same state as processing it once.
//!
//! The `processing` status doubles as a per-document mutex. Acquisition
//! is a conditional UPDATE, so two concurrent runs over the same
//! document cannot both proceed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::engine::KnowledgeEngine;
use crate::error::MeshError;
use crate::graph_store;
use crate::models::{
    Document, DocumentMeta, DocumentStatus, EdgeType, NodeType, PropertyBag, PropertyValue,
    Provenance,
};
use crate::retry::with_backoff;
use crate::vector_store::{self, VectorRecord};

/// Cooperative cancellation handle for an in-flight processing run.
/// Checked between chunks; already-committed artifacts for the current
/// run are rolled back and the document returns to `pending`.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one processing run produced.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub embedded: usize,
    pub entities: usize,
    pub relations: usize,
}

impl KnowledgeEngine {
    /// Accept a document for ingestion. The row starts `pending`; no
    /// chunking or embedding happens here.
    pub async fn submit(&self, meta: &DocumentMeta, text: &str) -> Result<Document, MeshError> {
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            corpus_id: meta.corpus_id.clone(),
            filename: meta.filename.clone(),
            content_type: meta.content_type.clone(),
            byte_size: meta.byte_size,
            status: DocumentStatus::Pending,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            "INSERT INTO documents
                (id, corpus_id, filename, content_type, byte_size, status, error, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.corpus_id)
        .bind(&doc.filename)
        .bind(&doc.content_type)
        .bind(doc.byte_size)
        .bind(doc.status.as_str())
        .bind(text)
        .bind(doc.created_at)
        .execute(self.pool())
        .await?;

        info!(document_id = %doc.id, filename = %doc.filename, "document submitted");
        Ok(doc)
    }

    /// Run the full pipeline for one document: invalidate prior
    /// artifacts, chunk, embed, extract, and index.
    ///
    /// Per-chunk capability failures are isolated: a chunk whose
    /// embedding fails after retries is skipped with a warning, and an
    /// extraction failure costs only that chunk's graph facts. The
    /// document fails outright only when no chunk at all could be
    /// embedded, or when its text is empty.
    pub async fn process(
        &self,
        document_id: &str,
        cancel: &CancelFlag,
    ) -> Result<IngestReport, MeshError> {
        let acquired = sqlx::query(
            "UPDATE documents SET status = 'processing', error = NULL
             WHERE id = ? AND status IN ('pending', 'ready', 'failed')",
        )
        .bind(document_id)
        .execute(self.pool())
        .await?;

        if acquired.rows_affected() == 0 {
            let row = sqlx::query("SELECT status FROM documents WHERE id = ?")
                .bind(document_id)
                .fetch_optional(self.pool())
                .await?;
            return match row {
                Some(r) => {
                    let status: String = r.get("status");
                    Err(MeshError::Busy(format!(
                        "document {} is {}",
                        document_id, status
                    )))
                }
                None => Err(MeshError::Input(format!(
                    "unknown document {}",
                    document_id
                ))),
            };
        }

        match self.run_pipeline(document_id, cancel).await {
            Ok(report) => {
                self.set_status(document_id, DocumentStatus::Ready, None).await?;
                info!(
                    document_id,
                    chunks = report.chunks,
                    embedded = report.embedded,
                    entities = report.entities,
                    relations = report.relations,
                    "document processed"
                );
                Ok(report)
            }
            Err(MeshError::Cancelled) => {
                // Roll back this run's artifacts and release the mutex.
                self.invalidate_artifacts(document_id).await?;
                self.set_status(document_id, DocumentStatus::Pending, None).await?;
                info!(document_id, "processing cancelled");
                Err(MeshError::Cancelled)
            }
            Err(err) => {
                self.set_status(document_id, DocumentStatus::Failed, Some(&err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    /// Reprocess is processing: the pipeline always starts from a clean
    /// slate, so a `ready` document just goes around again.
    pub async fn reprocess(
        &self,
        document_id: &str,
        cancel: &CancelFlag,
    ) -> Result<IngestReport, MeshError> {
        self.process(document_id, cancel).await
    }

    async fn run_pipeline(
        &self,
        document_id: &str,
        cancel: &CancelFlag,
    ) -> Result<IngestReport, MeshError> {
        let row = sqlx::query(
            "SELECT corpus_id, filename, content_type, body FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_one(self.pool())
        .await?;
        let corpus_id: String = row.get("corpus_id");
        let filename: String = row.get("filename");
        let content_type: String = row.get("content_type");
        let body: String = row.get("body");

        self.invalidate_artifacts(document_id).await?;

        let chunks = chunk_text(
            document_id,
            &body,
            self.config.chunking.target_chars,
            self.config.chunking.overlap_chars,
        );
        if chunks.is_empty() {
            return Err(MeshError::Input("document has no text".into()));
        }

        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunks
                    (id, document_id, chunk_index, text, start_char, end_char, overlap_chars)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .bind(chunk.overlap_chars)
            .execute(self.pool())
            .await?;
        }

        // The document itself is a graph node; entity mentions hang off
        // it with per-chunk provenance.
        let mut doc_props = PropertyBag::new();
        doc_props.insert("filename".into(), PropertyValue::Text(filename.clone()));
        doc_props.insert("content_type".into(), PropertyValue::Text(content_type.clone()));
        let doc_node_id = graph_store::upsert_node(
            self.pool(),
            &corpus_id,
            NodeType::Document,
            &filename,
            &doc_props,
            &Provenance {
                document_id: document_id.to_string(),
                chunk_id: None,
            },
        )
        .await?;

        let mut embedded = 0usize;
        let mut entities = 0usize;
        let mut relations = 0usize;

        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(MeshError::Cancelled);
            }

            let prov = Provenance {
                document_id: document_id.to_string(),
                chunk_id: Some(chunk.id.clone()),
            };

            let texts = vec![chunk.text.clone()];
            let embed_result = with_backoff(&self.config.retry, "embed chunk", || {
                let embedder = self.embedder.clone();
                let texts = texts.clone();
                async move { embedder.embed(&texts).await }
            })
            .await;

            match embed_result {
                Ok(vectors) => {
                    let record = VectorRecord {
                        chunk,
                        corpus_id: &corpus_id,
                        content_type: &content_type,
                        model: self.embedder.model(),
                    };
                    vector_store::upsert_vector(self.pool(), &record, &vectors[0]).await?;
                    embedded += 1;
                }
                Err(err) => {
                    warn!(document_id, chunk_index = chunk.chunk_index, error = %err,
                          "chunk embedding failed, skipping");
                }
            }

            let extraction = match with_backoff(&self.config.retry, "extract chunk", || {
                let extractor = self.extractor.clone();
                let text = chunk.text.clone();
                async move { extractor.extract(&text).await }
            })
            .await
            {
                Ok(extraction) => extraction,
                Err(err) => {
                    warn!(document_id, chunk_index = chunk.chunk_index, error = %err,
                          "chunk extraction failed, skipping its facts");
                    continue;
                }
            };

            // Names extracted from this chunk resolve locally first, so
            // relations between freshly-minted entities never miss.
            let mut local: std::collections::HashMap<String, String> =
                std::collections::HashMap::new();

            // Consistency failures drop the individual fact, never the
            // document; anything else is a real storage error.
            for entity in &extraction.entities {
                let node_id = match graph_store::upsert_node(
                    self.pool(),
                    &corpus_id,
                    entity.node_type,
                    &entity.name,
                    &PropertyBag::new(),
                    &prov,
                )
                .await
                {
                    Ok(id) => id,
                    Err(MeshError::Consistency(reason)) => {
                        warn!(document_id, name = %entity.name, %reason,
                              "dropping entity fact");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                match graph_store::upsert_edge(
                    self.pool(),
                    &corpus_id,
                    EdgeType::Mentions,
                    &doc_node_id,
                    &node_id,
                    &PropertyBag::new(),
                    &prov,
                )
                .await
                {
                    Ok(_) => {}
                    Err(MeshError::Consistency(reason)) => {
                        warn!(document_id, name = %entity.name, %reason,
                              "dropping mention fact");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
                local.insert(graph_store::normalize_name(&entity.name), node_id);
                entities += 1;
            }

            for relation in &extraction.relations {
                let source = self
                    .resolve_relation_endpoint(&local, &corpus_id, &relation.source)
                    .await?;
                let target = self
                    .resolve_relation_endpoint(&local, &corpus_id, &relation.target)
                    .await?;
                match (source, target) {
                    (Some(source_id), Some(target_id)) => {
                        match graph_store::upsert_edge(
                            self.pool(),
                            &corpus_id,
                            relation.edge_type,
                            &source_id,
                            &target_id,
                            &PropertyBag::new(),
                            &prov,
                        )
                        .await
                        {
                            Ok(_) => relations += 1,
                            Err(MeshError::Consistency(reason)) => {
                                warn!(document_id, source = %relation.source,
                                      target = %relation.target, %reason,
                                      "dropping relation fact");
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    _ => {
                        warn!(document_id, source = %relation.source, target = %relation.target,
                              "dropping relation with unresolvable endpoint");
                    }
                }
            }
        }

        if embedded == 0 {
            return Err(MeshError::Transient(
                "no chunk could be embedded".into(),
            ));
        }

        Ok(IngestReport {
            document_id: document_id.to_string(),
            chunks: chunks.len(),
            embedded,
            entities,
            relations,
        })
    }

    async fn resolve_relation_endpoint(
        &self,
        local: &std::collections::HashMap<String, String>,
        corpus_id: &str,
        name: &str,
    ) -> Result<Option<String>, MeshError> {
        let normalized = graph_store::normalize_name(name);
        if let Some(id) = local.get(&normalized) {
            return Ok(Some(id.clone()));
        }
        graph_store::resolve_node(self.pool(), corpus_id, name).await
    }

    /// Remove every derived artifact of a document, leaving its row.
    async fn invalidate_artifacts(&self, document_id: &str) -> Result<(), MeshError> {
        vector_store::delete_by_document(self.pool(), document_id).await?;
        graph_store::delete_by_document(self.pool(), document_id).await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete a document and everything derived from it. Graph facts
    /// another document also supports survive.
    pub async fn remove_document(&self, document_id: &str) -> Result<(), MeshError> {
        let exists = sqlx::query("SELECT 1 FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(self.pool())
            .await?;
        if exists.is_none() {
            return Err(MeshError::Input(format!(
                "unknown document {}",
                document_id
            )));
        }

        self.invalidate_artifacts(document_id).await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(self.pool())
            .await?;
        info!(document_id, "document removed");
        Ok(())
    }

    /// Fetch a document's current lifecycle state.
    pub async fn get_status(&self, document_id: &str) -> Result<Document, MeshError> {
        let row = sqlx::query(
            "SELECT id, corpus_id, filename, content_type, byte_size, status, error, created_at
             FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| MeshError::Input(format!("unknown document {}", document_id)))?;

        let status_str: String = row.get("status");
        Ok(Document {
            id: row.get("id"),
            corpus_id: row.get("corpus_id"),
            filename: row.get("filename"),
            content_type: row.get("content_type"),
            byte_size: row.get("byte_size"),
            status: DocumentStatus::parse(&status_str)?,
            error: row.get("error"),
            created_at: row.get("created_at"),
        })
    }

    async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<(), MeshError> {
        sqlx::query("UPDATE documents SET status = ?, error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(document_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

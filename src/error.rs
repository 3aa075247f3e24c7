//! Error taxonomy for the knowledge mesh core.
//!
//! Every failure the pipeline or stores can produce falls into one of a
//! small set of categories with distinct handling rules:
//!
//! | Variant | Handling |
//! |---------|----------|
//! | [`MeshError::Input`] | Surfaced to the caller immediately, never retried |
//! | [`MeshError::Transient`] | Retried with bounded backoff, then degraded |
//! | [`MeshError::Capability`] | Non-retryable capability failure (e.g. HTTP 4xx) |
//! | [`MeshError::Consistency`] | Logged, the offending fact is dropped |
//! | [`MeshError::NotReady`] | Excluded from results, not a user-facing failure |
//! | [`MeshError::Busy`] | A second ingestion request for a document already processing |
//!
//! The CLI boundary wraps these in `anyhow` for reporting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Malformed or empty document text.
    #[error("invalid input: {0}")]
    Input(String),

    /// Embedding/extraction/generation timeout or rate limit.
    #[error("transient capability failure: {0}")]
    Transient(String),

    /// A capability call failed in a way that retrying cannot fix.
    #[error("capability failure: {0}")]
    Capability(String),

    /// An upsert referenced a node or edge that cannot be resolved.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The document's knowledge is not yet available for querying.
    ///
    /// Reserved for callers layering stricter read semantics on top of
    /// the stores; the built-in retrieval path never raises it because
    /// the vector query excludes non-`ready` documents structurally.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The document is already being processed by another run.
    #[error("document busy: {0}")]
    Busy(String),

    /// An in-flight ingestion run was cancelled cooperatively.
    #[error("ingestion cancelled")]
    Cancelled,

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl MeshError {
    /// Whether a bounded-backoff retry is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, MeshError::Transient(_))
    }
}

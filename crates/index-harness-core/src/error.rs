//! Typed errors for the indexing pipeline.
//!
//! Variants follow the failure classes the orchestrator reacts to:
//! transient errors are retried with backoff, per-item errors are logged
//! and skipped, and everything else aborts the invocation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Rate limit, timeout, or network failure. Safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    #[error("importance weights must be non-negative and sum to 1.0 (got {sum})")]
    InvalidWeights { sum: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dependency graph contains a cycle ({ordered} of {total} nodes ordered)")]
    Cycle { ordered: usize, total: usize },

    #[error("unknown graph node: {0}")]
    NodeNotFound(String),

    #[error("timed out acquiring lock {0}")]
    LockTimeout(i64),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("embedder returned {got} vectors for {expected} inputs")]
    EmbeddingMismatch { expected: usize, got: usize },

    #[error("embedder returned a {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("failed to chunk {path}: {reason}")]
    Chunking { path: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Transient(_))
    }
}

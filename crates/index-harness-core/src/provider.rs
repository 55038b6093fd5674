//! Collaborator traits for fetching, chunking, and history.
//!
//! Implement [`DocumentProvider`] to teach the pipeline a new kind of
//! source. The app crate resolves one provider per source type up front;
//! the pipeline never inspects a provider's concrete type.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Document, EditFrequencies, FetchResult, RawChunk, SourceParams};

/// A per-source-type abstraction yielding documents and a version id.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Source type label (e.g. `"git"`, `"filesystem"`).
    fn source_type(&self) -> &str;

    /// Fetch the current state of the source.
    async fn fetch_documents(&self, params: &SourceParams) -> Result<FetchResult>;

    /// Derive a stable source name from a locator.
    ///
    /// `https://github.com/acme/web.git` → `acme/web`.
    fn extract_source_name(&self, identifier: &str) -> String;

    /// Opaque, type-specific metadata stored with the source.
    fn create_metadata(&self, params: &SourceParams) -> serde_json::Value;

    /// Whether a fetched document should be recorded but not indexed.
    fn should_ignore(&self, document: &Document) -> bool;
}

/// Splits a file into line-ranged chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, path: &str, content: &str) -> Result<Vec<RawChunk>>;
}

/// Commit activity lookups for edit-frequency scoring.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Per-path commit counts for commits on `git_ref` since `since`,
    /// read from the checkout at `path`.
    async fn file_edit_frequencies(
        &self,
        path: &Path,
        git_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<EditFrequencies>;
}

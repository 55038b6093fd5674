//! Core data models used throughout Index Harness.
//!
//! These types represent the documents, prepared files, chunks, and
//! snapshot records that flow from a document provider through the
//! preparation and commit stages into the store.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a string.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Version-control metadata attached to a fetched document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: Option<String>,
    pub last_edited: Option<DateTime<Utc>>,
    pub commit_hash: Option<String>,
}

/// A document yielded by a [`DocumentProvider`](crate::provider::DocumentProvider).
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub size: u64,
    pub commit: CommitInfo,
}

impl Document {
    /// Build a document, computing its content hash and size.
    pub fn new(path: impl Into<String>, content: impl Into<String>, commit: CommitInfo) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            content_hash: content_hash(&content),
            size: content.len() as u64,
            content,
            commit,
        }
    }
}

/// Parameters for one indexing invocation against a source.
#[derive(Debug, Clone, Default)]
pub struct SourceParams {
    /// Repository URL, directory path, or other provider-specific locator.
    pub identifier: String,
    /// Branch or ref to fetch, when the provider supports it.
    pub git_ref: Option<String>,
    /// Ignore the previous indexed snapshot and re-index everything.
    pub force: bool,
}

/// The current state of a source as reported by its provider.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub documents: Vec<Document>,
    /// Opaque identifier of the fetched version (e.g. a commit SHA).
    pub version: String,
    /// Local checkout, when one exists. Used for edit-frequency history.
    pub workdir: Option<PathBuf>,
}

/// A logical origin of documents, such as one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub source_type: String,
    pub metadata: serde_json::Value,
}

/// One indexed version of a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub source_id: String,
    pub version: String,
    pub indexed: bool,
    pub created_at: i64,
}

/// Optional structural metadata a chunker may attach to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
}

impl ChunkMetadata {
    pub fn is_empty(&self) -> bool {
        *self == ChunkMetadata::default()
    }
}

/// Chunker output: a contiguous line range of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive.
    pub end_line: u32,
    pub content: String,
    pub metadata: Option<ChunkMetadata>,
}

/// A chunk that has been hashed and embedded, ready to persist.
#[derive(Debug, Clone)]
pub struct PreparedChunk {
    pub ordinal: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub content_hash: String,
    pub token_count: u32,
    pub metadata: Option<ChunkMetadata>,
    pub vector: Vec<f32>,
}

/// A changed or new document after type detection, chunking, and embedding.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub path: String,
    pub size: u64,
    pub content_type: String,
    pub content_hash: String,
    pub language: Option<String>,
    pub domain: String,
    pub commit: CommitInfo,
    pub chunks: Vec<PreparedChunk>,
}

/// What happened to a fetched document during one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Indexed,
    Unchanged,
    Ignored,
    Failed,
}

impl FileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOutcome::Indexed => "indexed",
            FileOutcome::Unchanged => "unchanged",
            FileOutcome::Ignored => "ignored",
            FileOutcome::Failed => "failed",
        }
    }

    /// Whether the path counts as known content for the next diff.
    pub fn is_known(&self) -> bool {
        matches!(self, FileOutcome::Indexed | FileOutcome::Unchanged)
    }
}

impl std::str::FromStr for FileOutcome {
    type Err = crate::IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indexed" => Ok(FileOutcome::Indexed),
            "unchanged" => Ok(FileOutcome::Unchanged),
            "ignored" => Ok(FileOutcome::Ignored),
            "failed" => Ok(FileOutcome::Failed),
            other => Err(crate::IndexError::Other(format!(
                "unknown file outcome: {}",
                other
            ))),
        }
    }
}

/// Record of a document seen in a snapshot, whatever its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFileRecord {
    pub path: String,
    pub content_hash: String,
    pub size: u64,
    pub outcome: FileOutcome,
    pub reason: Option<String>,
}

/// The per-chunk view the importance pass works on.
#[derive(Debug, Clone, Default)]
pub struct ScoringChunk {
    pub id: String,
    pub path: String,
    pub symbol_name: Option<String>,
    pub symbol_type: Option<String>,
    pub calls: Vec<String>,
}

/// A directed, typed relation between two chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    pub from_chunk: String,
    pub to_chunk: String,
    pub relation: String,
    pub weight: f64,
}

/// Commit activity for one path inside the history window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileEditFrequency {
    pub count: u32,
    pub last_edited: Option<DateTime<Utc>>,
}

pub type EditFrequencies = HashMap<String, FileEditFrequency>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_new_hashes_content() {
        let doc = Document::new("src/lib.rs", "fn main() {}", CommitInfo::default());
        assert_eq!(doc.size, 12);
        assert_eq!(doc.content_hash, content_hash("fn main() {}"));
        assert_eq!(doc.content_hash.len(), 64);
    }

    #[test]
    fn file_outcome_round_trips_through_str() {
        for outcome in [
            FileOutcome::Indexed,
            FileOutcome::Unchanged,
            FileOutcome::Ignored,
            FileOutcome::Failed,
        ] {
            assert_eq!(outcome.as_str().parse::<FileOutcome>().unwrap(), outcome);
        }
        assert!("bogus".parse::<FileOutcome>().is_err());
    }

    #[test]
    fn chunk_metadata_serializes_sparsely() {
        let meta = ChunkMetadata {
            symbol_name: Some("run".into()),
            calls: vec!["helper".into()],
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"symbol_name":"run","calls":["helper"]}"#);
        let back: ChunkMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}

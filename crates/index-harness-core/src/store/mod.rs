//! Persistence ports.
//!
//! [`IndexStore`] covers reads made outside the commit transaction and the
//! post-commit writes of the importance pass. Every write that creates a
//! snapshot goes through one [`StoreTransaction`], which is committed or
//! rolled back as a unit. Dropping a transaction without committing must
//! roll it back.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`begin`](IndexStore::begin) | Open the commit transaction |
//! | [`find_source`](IndexStore::find_source) | Look up a source by name |
//! | [`find_snapshot`](IndexStore::find_snapshot) | Look up a snapshot by version |
//! | [`latest_indexed_snapshot`](IndexStore::latest_indexed_snapshot) | Previous indexed version |
//! | [`known_file_hashes`](IndexStore::known_file_hashes) | Diff input for a snapshot |
//! | [`latest_chunks`](IndexStore::latest_chunks) | Chunk set for scoring |
//! | [`replace_dependencies`](IndexStore::replace_dependencies) | Persist graph edges |
//! | [`update_importance`](IndexStore::update_importance) | Persist scores |

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    CommitInfo, DependencyEdge, PreparedChunk, PreparedFile, ScoringChunk, Snapshot,
    SnapshotFileRecord, Source,
};

/// Trace metadata written alongside each chunk.
#[derive(Debug, Clone)]
pub struct ChunkTrace {
    pub chunk_key: String,
    pub commit: CommitInfo,
    pub is_latest: bool,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn find_source(&self, name: &str) -> Result<Option<Source>>;

    async fn find_snapshot(&self, source_id: &str, version: &str) -> Result<Option<Snapshot>>;

    async fn latest_indexed_snapshot(&self, source_id: &str) -> Result<Option<Snapshot>>;

    /// `path → content_hash` for documents the snapshot indexed or carried
    /// over unchanged.
    async fn known_file_hashes(&self, snapshot_id: &str) -> Result<HashMap<String, String>>;

    /// Latest chunks of every file of the source.
    async fn latest_chunks(&self, source_id: &str) -> Result<Vec<ScoringChunk>>;

    /// Replace every dependency edge of the source's chunks.
    async fn replace_dependencies(
        &self,
        source_id: &str,
        snapshot_id: &str,
        edges: &[DependencyEdge],
    ) -> Result<()>;

    /// Write `(chunk_id, score)` pairs.
    async fn update_importance(&self, scores: &[(String, f64)]) -> Result<()>;
}

/// One all-or-nothing unit of writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert the source if its name is new; return the stored record.
    async fn upsert_source(
        &mut self,
        name: &str,
        source_type: &str,
        metadata: &serde_json::Value,
    ) -> Result<Source>;

    async fn find_snapshot(&mut self, source_id: &str, version: &str) -> Result<Option<Snapshot>>;

    /// Latest indexed snapshot as seen by this transaction.
    async fn latest_indexed_snapshot(&mut self, source_id: &str) -> Result<Option<Snapshot>>;

    async fn create_snapshot(&mut self, source_id: &str, version: &str) -> Result<Snapshot>;

    /// Delete the latest files (with chunks, embeddings, edges) at `paths`.
    async fn delete_paths(&mut self, source_id: &str, paths: &[String]) -> Result<u64>;

    /// Clear `is_latest` on the current files and chunks at `paths`.
    async fn supersede_paths(&mut self, source_id: &str, paths: &[String]) -> Result<u64>;

    async fn insert_snapshot_file(
        &mut self,
        snapshot_id: &str,
        record: &SnapshotFileRecord,
    ) -> Result<()>;

    /// Insert a file row, returning its id.
    async fn insert_file(
        &mut self,
        source_id: &str,
        snapshot_id: &str,
        file: &PreparedFile,
    ) -> Result<String>;

    /// Insert a chunk and its embedding, returning the chunk id.
    async fn insert_chunk(
        &mut self,
        file_id: &str,
        chunk: &PreparedChunk,
        trace: &ChunkTrace,
        model: &str,
    ) -> Result<String>;

    async fn mark_snapshot_indexed(&mut self, snapshot_id: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

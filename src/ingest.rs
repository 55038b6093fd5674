//! Indexing pipeline orchestration.
//!
//! One invocation indexes one source at one version:
//!
//! ```text
//! provider → diff → prepare → commit (locked, transactional) → importance
//! ```
//!
//! Only the commit stage writes the system of record. Everything before it
//! is safe to abandon; dropping the future returned by
//! [`IndexPipeline::run`] cancels the run, rolls back an open transaction,
//! and releases a held lock row in the background.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use index_harness_core::chunk::LineChunker;
use index_harness_core::diff::diff;
use index_harness_core::embedding::Embedder;
use index_harness_core::importance::ImportanceEngine;
use index_harness_core::lock::LockManager;
use index_harness_core::models::{
    Document, FileOutcome, Snapshot, SnapshotFileRecord, SourceParams,
};
use index_harness_core::provider::{Chunker, DocumentProvider, HistoryProvider};
use index_harness_core::store::IndexStore;

use crate::commit::{commit, CommitOutcome, CommitRequest};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::lock::SqliteLockManager;
use crate::prepare::{PrepareStats, Preparer};
use crate::scoring::{score_source, HistorySource, ScoringReport};
use crate::sqlite_store::SqliteStore;

/// Whether the run wrote a new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    AlreadyIndexed,
}

/// Result of the importance pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportanceStatus {
    Scored(ScoringReport),
    Skipped,
    Failed(String),
}

/// What one invocation did.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub source: String,
    pub snapshot_id: String,
    pub version: String,
    pub outcome: IndexOutcome,
    pub fetched: usize,
    pub ignored: usize,
    pub unchanged: usize,
    pub indexed: usize,
    pub failed: usize,
    pub deleted: usize,
    pub chunks: usize,
    pub importance: ImportanceStatus,
}

impl IndexSummary {
    pub fn is_noop(&self) -> bool {
        self.outcome == IndexOutcome::AlreadyIndexed
    }

    fn already_indexed(source: &str, snapshot: &Snapshot, fetched: usize) -> Self {
        Self {
            source: source.to_string(),
            snapshot_id: snapshot.id.clone(),
            version: snapshot.version.clone(),
            outcome: IndexOutcome::AlreadyIndexed,
            fetched,
            ignored: 0,
            unchanged: 0,
            indexed: 0,
            failed: 0,
            deleted: 0,
            chunks: 0,
            importance: ImportanceStatus::Skipped,
        }
    }
}

impl fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "index {}", self.source)?;
        writeln!(f, "  version: {}", self.version)?;
        writeln!(f, "  snapshot: {}", self.snapshot_id)?;
        if self.is_noop() {
            return writeln!(f, "  already indexed");
        }
        writeln!(f, "  fetched: {}", self.fetched)?;
        writeln!(f, "  indexed: {}", self.indexed)?;
        writeln!(f, "  unchanged: {}", self.unchanged)?;
        writeln!(f, "  ignored: {}", self.ignored)?;
        writeln!(f, "  failed: {}", self.failed)?;
        writeln!(f, "  deleted: {}", self.deleted)?;
        writeln!(f, "  chunks written: {}", self.chunks)?;
        match &self.importance {
            ImportanceStatus::Scored(r) => writeln!(
                f,
                "  importance: {} chunks, {} edges, {} cycles",
                r.chunks, r.edges, r.cycles
            ),
            ImportanceStatus::Skipped => writeln!(f, "  importance: skipped"),
            ImportanceStatus::Failed(e) => writeln!(f, "  importance: failed ({})", e),
        }
    }
}

/// Run-wide settings taken from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub product: String,
    pub embed_batch_size: usize,
    pub workers: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            product: config.indexing.product.clone(),
            embed_batch_size: config.indexing.embed_batch_size,
            workers: config.indexing.workers,
        }
    }
}

pub struct IndexPipeline {
    store: Arc<dyn IndexStore>,
    locks: Arc<dyn LockManager>,
    embedder: Arc<dyn Embedder>,
    preparer: Preparer,
    engine: ImportanceEngine,
    settings: PipelineSettings,
}

impl IndexPipeline {
    pub fn new(
        store: Arc<dyn IndexStore>,
        locks: Arc<dyn LockManager>,
        embedder: Arc<dyn Embedder>,
        chunker: Arc<dyn Chunker>,
        engine: ImportanceEngine,
        settings: PipelineSettings,
    ) -> Self {
        let preparer = Preparer::new(chunker, settings.workers, settings.embed_batch_size);
        Self {
            store,
            locks,
            embedder,
            preparer,
            engine,
            settings,
        }
    }

    /// Wire the SQLite store, lock manager, configured embedder, and line
    /// chunker. Fails on invalid importance weights.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let engine = ImportanceEngine::new(
            config.importance.weights(),
            config.importance.window_days,
        )?;
        let embedder = create_embedder(&config.embedding, config.retry)?;
        Ok(Self::new(
            Arc::new(SqliteStore::new(pool.clone())),
            Arc::new(SqliteLockManager::new(pool, &config.lock)),
            Arc::from(embedder),
            Arc::new(LineChunker::new(config.chunking.max_lines)),
            engine,
            PipelineSettings::from_config(config),
        ))
    }

    /// Index the current state of one source.
    pub async fn run(
        &self,
        provider: &dyn DocumentProvider,
        history: Option<&dyn HistoryProvider>,
        params: &SourceParams,
    ) -> Result<IndexSummary> {
        let source_name = provider.extract_source_name(&params.identifier);
        let source_type = provider.source_type().to_string();

        let fetch = provider
            .fetch_documents(params)
            .await
            .with_context(|| format!("failed to fetch {}", params.identifier))?;
        let fetched = fetch.documents.len();
        tracing::info!(
            source = %source_name,
            version = %fetch.version,
            documents = fetched,
            "fetched source"
        );

        // Fast path: this exact version is already committed.
        let source = self.store.find_source(&source_name).await?;
        let previous = match &source {
            Some(source) => {
                if let Some(snapshot) = self
                    .store
                    .find_snapshot(&source.id, &fetch.version)
                    .await?
                    .filter(|s| s.indexed)
                {
                    tracing::info!(
                        source = %source_name,
                        snapshot_id = %snapshot.id,
                        "version already indexed"
                    );
                    return Ok(IndexSummary::already_indexed(&source_name, &snapshot, fetched));
                }
                self.store.latest_indexed_snapshot(&source.id).await?
            }
            None => None,
        };
        let previous_hashes = match &previous {
            Some(snapshot) => self.store.known_file_hashes(&snapshot.id).await?,
            None => HashMap::new(),
        };

        // Ignored documents take no part in the diff; a previously indexed
        // path that is now ignored counts as deleted.
        let (ignored, candidates): (Vec<Document>, Vec<Document>) = fetch
            .documents
            .into_iter()
            .partition(|d| provider.should_ignore(d));

        let current = candidates
            .iter()
            .map(|d| (d.path.as_str(), d.content_hash.as_str()));
        let diff_result = if params.force {
            diff(current, &HashMap::new())
        } else {
            diff(current, &previous_hashes)
        };
        let deleted: Vec<String> = if params.force {
            let current: BTreeSet<&str> = candidates.iter().map(|d| d.path.as_str()).collect();
            let mut gone: Vec<String> = previous_hashes
                .keys()
                .filter(|p| !current.contains(p.as_str()))
                .cloned()
                .collect();
            gone.sort();
            gone
        } else {
            diff_result.deleted.clone()
        };
        let to_index = diff_result.to_index();
        tracing::info!(
            source = %source_name,
            new = diff_result.new_paths().len(),
            changed = diff_result.changed().len(),
            unchanged = diff_result.unchanged().len(),
            deleted = deleted.len(),
            ignored = ignored.len(),
            force = params.force,
            "diffed against previous snapshot"
        );

        let mut records: Vec<SnapshotFileRecord> = ignored
            .iter()
            .map(|d| record(d, FileOutcome::Ignored, Some("filtered by provider")))
            .collect();
        let mut work = Vec::with_capacity(to_index.len());
        for document in candidates {
            let needs_indexing = diff_result
                .kind(&document.path)
                .is_some_and(|k| k.needs_indexing());
            if needs_indexing {
                work.push(document);
            } else {
                records.push(record(&document, FileOutcome::Unchanged, None));
            }
        }
        let unchanged = records
            .iter()
            .filter(|r| r.outcome == FileOutcome::Unchanged)
            .count();

        // Snapshot-file records for the work list need only path/hash/size.
        let work_records: Vec<SnapshotFileRecord> = work
            .iter()
            .map(|d| record(d, FileOutcome::Indexed, None))
            .collect();

        let prepared = self.preparer.prepare(work, self.embedder.as_ref()).await?;
        let PrepareStats { failed, .. } = prepared.stats;

        for mut r in work_records {
            if let Some(reason) = prepared.failures.get(&r.path) {
                r.outcome = FileOutcome::Failed;
                r.reason = Some(reason.clone());
            }
            records.push(r);
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let metadata = provider.create_metadata(params);
        let request = CommitRequest {
            product: &self.settings.product,
            source_name: &source_name,
            source_type: &source_type,
            metadata: &metadata,
            version: &fetch.version,
            previous_snapshot_id: previous.as_ref().map(|s| s.id.as_str()),
            deleted: &deleted,
            superseded: &to_index,
            records: &records,
            files: &prepared.files,
            model: self.embedder.model_name(),
        };

        let (source, snapshot, indexed, chunks, deleted_count) =
            match commit(self.store.as_ref(), self.locks.as_ref(), &request).await? {
                CommitOutcome::AlreadyIndexed { snapshot, .. } => {
                    return Ok(IndexSummary::already_indexed(&source_name, &snapshot, fetched));
                }
                CommitOutcome::Committed {
                    source,
                    snapshot,
                    files,
                    chunks,
                    deleted,
                } => (source, snapshot, files, chunks, deleted as usize),
            };
        tracing::info!(
            source = %source.name,
            snapshot_id = %snapshot.id,
            files = indexed,
            chunks,
            "snapshot committed"
        );

        let history_source = match (history, fetch.workdir.as_deref()) {
            (Some(provider), Some(workdir)) => Some(HistorySource {
                provider,
                workdir,
                git_ref: "HEAD",
            }),
            _ => None,
        };
        let importance = match score_source(
            self.store.as_ref(),
            &self.engine,
            history_source,
            &source.id,
            &snapshot.id,
        )
        .await
        {
            Ok(report) => ImportanceStatus::Scored(report),
            Err(e) => {
                tracing::warn!(
                    source = %source.name,
                    error = %format!("{:#}", e),
                    "importance pass failed; snapshot is still valid"
                );
                ImportanceStatus::Failed(format!("{:#}", e))
            }
        };

        Ok(IndexSummary {
            source: source.name,
            snapshot_id: snapshot.id,
            version: snapshot.version,
            outcome: IndexOutcome::Indexed,
            fetched,
            ignored: ignored.len(),
            unchanged,
            indexed,
            failed,
            deleted: deleted_count,
            chunks,
            importance,
        })
    }
}

fn record(document: &Document, outcome: FileOutcome, reason: Option<&str>) -> SnapshotFileRecord {
    SnapshotFileRecord {
        path: document.path.clone(),
        content_hash: document.content_hash.clone(),
        size: document.size,
        outcome,
        reason: reason.map(str::to_string),
    }
}

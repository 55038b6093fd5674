//! Commit stage.
//!
//! Everything a snapshot consists of is written under the source lock in
//! one store transaction:
//!
//! ```text
//! NotStarted → LockAcquired → IdempotencyChecked → SnapshotCreated
//!            → FilesPersisted → Finalized
//! ```
//!
//! If a snapshot for the version already exists the stage returns it as a
//! successful no-op. Any error rolls the transaction back, and the lock is
//! released on every path.

use anyhow::{Context, Result};

use index_harness_core::key::chunk_key;
use index_harness_core::lock::{lock_id, LockManager};
use index_harness_core::models::{PreparedFile, Snapshot, SnapshotFileRecord, Source};
use index_harness_core::store::{ChunkTrace, IndexStore, StoreTransaction};
use index_harness_core::IndexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitState {
    NotStarted,
    LockAcquired,
    IdempotencyChecked,
    SnapshotCreated,
    FilesPersisted,
    Finalized,
}

/// Everything the commit stage writes for one version.
#[derive(Debug)]
pub struct CommitRequest<'a> {
    pub product: &'a str,
    pub source_name: &'a str,
    pub source_type: &'a str,
    pub metadata: &'a serde_json::Value,
    pub version: &'a str,
    /// Snapshot the diff was computed against.
    pub previous_snapshot_id: Option<&'a str>,
    /// Paths absent relative to the previous snapshot.
    pub deleted: &'a [String],
    /// Paths whose current rows are replaced by this snapshot.
    pub superseded: &'a [String],
    /// One record per fetched document.
    pub records: &'a [SnapshotFileRecord],
    pub files: &'a [PreparedFile],
    pub model: &'a str,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed {
        source: Source,
        snapshot: Snapshot,
        files: usize,
        chunks: usize,
        deleted: u64,
    },
    AlreadyIndexed {
        source: Source,
        snapshot: Snapshot,
    },
}

impl CommitOutcome {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            CommitOutcome::Committed { snapshot, .. } => snapshot,
            CommitOutcome::AlreadyIndexed { snapshot, .. } => snapshot,
        }
    }

    pub fn source(&self) -> &Source {
        match self {
            CommitOutcome::Committed { source, .. } => source,
            CommitOutcome::AlreadyIndexed { source, .. } => source,
        }
    }
}

/// Run the commit stage for `request`.
pub async fn commit(
    store: &dyn IndexStore,
    locks: &dyn LockManager,
    request: &CommitRequest<'_>,
) -> Result<CommitOutcome> {
    let mut state = CommitState::NotStarted;
    // Keyed by source identity, not the raw identifier.
    let id = lock_id(request.source_type, request.source_name);

    let guard = locks
        .acquire(id)
        .await
        .with_context(|| format!("failed to lock source {}", request.source_name))?;
    transition(&mut state, CommitState::LockAcquired, request);

    let result = commit_locked(store, request, &mut state).await;

    if let Err(e) = guard.release().await {
        tracing::warn!(lock_id = id, error = %e, "failed to release lock");
    }

    if let Err(e) = &result {
        tracing::error!(
            source = request.source_name,
            version = request.version,
            state = ?state,
            error = %e,
            "commit failed; rolled back"
        );
    }
    result
}

async fn commit_locked(
    store: &dyn IndexStore,
    request: &CommitRequest<'_>,
    state: &mut CommitState,
) -> Result<CommitOutcome> {
    let mut tx = store.begin().await?;
    let written = write_snapshot(tx.as_mut(), request, state).await;
    match written {
        Ok(outcome @ CommitOutcome::AlreadyIndexed { .. }) => {
            tx.rollback().await?;
            Ok(outcome)
        }
        Ok(outcome) => {
            tx.commit().await?;
            transition(state, CommitState::Finalized, request);
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn write_snapshot(
    tx: &mut dyn StoreTransaction,
    request: &CommitRequest<'_>,
    state: &mut CommitState,
) -> Result<CommitOutcome> {
    let source = tx
        .upsert_source(request.source_name, request.source_type, request.metadata)
        .await?;

    if let Some(snapshot) = tx.find_snapshot(&source.id, request.version).await? {
        tracing::info!(
            source = %source.name,
            snapshot_id = %snapshot.id,
            version = request.version,
            "snapshot already exists; nothing to do"
        );
        return Ok(CommitOutcome::AlreadyIndexed { source, snapshot });
    }

    // The diff is only valid against the snapshot it was computed from.
    let latest = tx.latest_indexed_snapshot(&source.id).await?;
    if latest.as_ref().map(|s| s.id.as_str()) != request.previous_snapshot_id {
        return Err(IndexError::Transient(format!(
            "source {} advanced to a new snapshot during this run",
            request.source_name
        ))
        .into());
    }
    transition(state, CommitState::IdempotencyChecked, request);

    let mut snapshot = tx.create_snapshot(&source.id, request.version).await?;
    transition(state, CommitState::SnapshotCreated, request);

    let deleted = tx.delete_paths(&source.id, request.deleted).await?;
    let superseded = tx.supersede_paths(&source.id, request.superseded).await?;
    tracing::debug!(deleted, superseded, "retired previous rows");

    for record in request.records {
        tx.insert_snapshot_file(&snapshot.id, record).await?;
    }

    let mut chunks = 0;
    for file in request.files {
        let file_id = tx.insert_file(&source.id, &snapshot.id, file).await?;
        let commit_hash = file
            .commit
            .commit_hash
            .as_deref()
            .unwrap_or(request.version);
        for chunk in &file.chunks {
            let trace = ChunkTrace {
                chunk_key: chunk_key(
                    request.product,
                    &source.name,
                    &file.path,
                    chunk.start_line,
                    chunk.end_line,
                    commit_hash,
                ),
                commit: file.commit.clone(),
                is_latest: true,
            };
            tx.insert_chunk(&file_id, chunk, &trace, request.model)
                .await?;
            chunks += 1;
        }
    }
    transition(state, CommitState::FilesPersisted, request);

    tx.mark_snapshot_indexed(&snapshot.id).await?;
    snapshot.indexed = true;

    Ok(CommitOutcome::Committed {
        source,
        snapshot,
        files: request.files.len(),
        chunks,
        deleted,
    })
}

fn transition(state: &mut CommitState, next: CommitState, request: &CommitRequest<'_>) {
    tracing::debug!(
        source = request.source_name,
        version = request.version,
        from = ?*state,
        to = ?next,
        "commit state"
    );
    *state = next;
}

//! Post-commit importance pass.
//!
//! Builds the dependency graph over a source's latest chunks, stores its
//! edges, merges edit frequencies from the history provider, and writes a
//! score back to every chunk. Best-effort: the orchestrator logs failures
//! and keeps the committed snapshot.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use index_harness_core::graph::DependencyGraph;
use index_harness_core::importance::ImportanceEngine;
use index_harness_core::models::EditFrequencies;
use index_harness_core::provider::HistoryProvider;
use index_harness_core::store::IndexStore;

/// What one importance pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScoringReport {
    pub chunks: usize,
    pub edges: usize,
    pub cycles: usize,
    pub components: usize,
    pub files_with_history: usize,
}

/// Where edit history comes from.
pub struct HistorySource<'a> {
    pub provider: &'a dyn HistoryProvider,
    pub workdir: &'a Path,
    pub git_ref: &'a str,
}

pub async fn score_source(
    store: &dyn IndexStore,
    engine: &ImportanceEngine,
    history: Option<HistorySource<'_>>,
    source_id: &str,
    snapshot_id: &str,
) -> Result<ScoringReport> {
    let chunks = store.latest_chunks(source_id).await?;
    let graph = DependencyGraph::from_chunks(&chunks);

    let cycles = graph.find_cycles();
    let components = graph.strongly_connected_components();
    if let Err(e) = graph.topological_order() {
        tracing::debug!(error = %e, "dependency graph is cyclic");
    }

    let edges = graph.edges();
    store
        .replace_dependencies(source_id, snapshot_id, &edges)
        .await?;

    let edits = match history {
        Some(h) => {
            let since = Utc::now() - engine.window();
            match h
                .provider
                .file_edit_frequencies(h.workdir, h.git_ref, since)
                .await
            {
                Ok(edits) => edits,
                Err(e) => {
                    tracing::warn!(error = %e, "edit history unavailable; scoring without it");
                    EditFrequencies::new()
                }
            }
        }
        None => EditFrequencies::new(),
    };

    let scores = engine.score(&graph, &chunks, &edits)?;
    let pairs: Vec<(String, f64)> = scores.into_iter().map(|s| (s.chunk_id, s.score)).collect();
    store.update_importance(&pairs).await?;

    let report = ScoringReport {
        chunks: chunks.len(),
        edges: edges.len(),
        cycles: cycles.len(),
        components: components.len(),
        files_with_history: edits.len(),
    };
    tracing::info!(
        source_id,
        chunks = report.chunks,
        edges = report.edges,
        cycles = report.cycles,
        components = report.components,
        "importance scores updated"
    );
    Ok(report)
}

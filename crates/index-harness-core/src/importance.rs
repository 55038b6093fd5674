//! Importance scoring.
//!
//! Each chunk gets a score in `[0, 1]` from three signals:
//!
//! | Signal | Raw value |
//! |--------|-----------|
//! | reference count | in-degree in the dependency graph |
//! | centrality | [`DependencyGraph::centrality`] |
//! | edit frequency | commits touching the chunk's file inside the window |
//!
//! Every raw signal is divided by its maximum across the chunks scored in
//! the same run (a zero maximum normalizes to 0), then combined as
//! `Σ weightᵢ × normalizedᵢ`. Scores are a per-run relative ranking:
//! adding or removing chunks shifts every normalized value.

use std::collections::HashMap;

use chrono::Duration;

use crate::error::{IndexError, Result};
use crate::graph::DependencyGraph;
use crate::models::{EditFrequencies, ScoringChunk};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Default trailing window for edit frequency.
pub const DEFAULT_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportanceWeights {
    pub reference: f64,
    pub centrality: f64,
    pub edit_frequency: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            reference: 0.4,
            centrality: 0.3,
            edit_frequency: 0.3,
        }
    }
}

impl ImportanceWeights {
    /// Reject negative weights and weights that do not sum to 1.0.
    pub fn validate(&self) -> Result<()> {
        let sum = self.reference + self.centrality + self.edit_frequency;
        let negative = [self.reference, self.centrality, self.edit_frequency]
            .iter()
            .any(|w| *w < 0.0 || !w.is_finite());
        if negative || (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(IndexError::InvalidWeights { sum });
        }
        Ok(())
    }
}

/// Raw signals for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSignals {
    pub chunk_id: String,
    pub reference_count: f64,
    pub centrality: f64,
    pub edit_frequency: f64,
}

/// Normalized signals and the weighted score for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceScore {
    pub chunk_id: String,
    pub reference_count: f64,
    pub centrality: f64,
    pub edit_frequency: f64,
    pub score: f64,
}

/// Divide each value by the maximum; all zeros when the maximum is 0.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v.max(0.0) / max).min(1.0)).collect()
}

/// Normalize signals and combine them with `weights`.
///
/// Weights are validated before anything is computed.
pub fn compute_scores(
    signals: &[ChunkSignals],
    weights: &ImportanceWeights,
) -> Result<Vec<ImportanceScore>> {
    weights.validate()?;

    let refs = normalize(&signals.iter().map(|s| s.reference_count).collect::<Vec<_>>());
    let cent = normalize(&signals.iter().map(|s| s.centrality).collect::<Vec<_>>());
    let edits = normalize(&signals.iter().map(|s| s.edit_frequency).collect::<Vec<_>>());

    Ok(signals
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let score = weights.reference * refs[i]
                + weights.centrality * cent[i]
                + weights.edit_frequency * edits[i];
            ImportanceScore {
                chunk_id: s.chunk_id.clone(),
                reference_count: refs[i],
                centrality: cent[i],
                edit_frequency: edits[i],
                score: score.clamp(0.0, 1.0),
            }
        })
        .collect())
}

/// Collects signals from a graph plus edit history and scores them.
#[derive(Debug, Clone)]
pub struct ImportanceEngine {
    weights: ImportanceWeights,
    window: Duration,
}

impl ImportanceEngine {
    /// Fails if `weights` are invalid.
    pub fn new(weights: ImportanceWeights, window_days: i64) -> Result<Self> {
        weights.validate()?;
        if window_days <= 0 {
            return Err(IndexError::InvalidConfig(format!(
                "importance window must be positive (got {} days)",
                window_days
            )));
        }
        Ok(Self {
            weights,
            window: Duration::days(window_days),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Gather raw signals for `chunks`. Paths missing from `edits` count 0.
    pub fn signals(
        &self,
        graph: &DependencyGraph,
        chunks: &[ScoringChunk],
        edits: &EditFrequencies,
    ) -> Vec<ChunkSignals> {
        let centrality: HashMap<String, f64> = graph.centrality();
        chunks
            .iter()
            .map(|chunk| ChunkSignals {
                chunk_id: chunk.id.clone(),
                reference_count: graph.in_degree(&chunk.id) as f64,
                centrality: centrality.get(&chunk.id).copied().unwrap_or(0.0),
                edit_frequency: edits.get(&chunk.path).map(|f| f.count as f64).unwrap_or(0.0),
            })
            .collect()
    }

    pub fn score(
        &self,
        graph: &DependencyGraph,
        chunks: &[ScoringChunk],
        edits: &EditFrequencies,
    ) -> Result<Vec<ImportanceScore>> {
        compute_scores(&self.signals(graph, chunks, edits), &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CALLS;
    use crate::models::FileEditFrequency;

    fn signals(refs: &[f64], cent: f64, edits: f64) -> Vec<ChunkSignals> {
        refs.iter()
            .enumerate()
            .map(|(i, r)| ChunkSignals {
                chunk_id: format!("c{i}"),
                reference_count: *r,
                centrality: cent,
                edit_frequency: edits,
            })
            .collect()
    }

    #[test]
    fn test_reference_counts_normalize_by_max() {
        let scores = compute_scores(&signals(&[10.0, 5.0, 0.0], 1.0, 1.0), &Default::default())
            .unwrap();
        let refs: Vec<f64> = scores.iter().map(|s| s.reference_count).collect();
        assert_eq!(refs, vec![1.0, 0.5, 0.0]);
        assert!(scores[0].score > scores[1].score);
        assert!(scores[1].score > scores[2].score);
    }

    #[test]
    fn test_zero_max_normalizes_to_zero() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let huge = signals(&[1e12, 3.0, 7e9], 1e6, 4e8);
        for s in compute_scores(&huge, &Default::default()).unwrap() {
            assert!((0.0..=1.0).contains(&s.score), "{} out of range", s.score);
        }
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        for (r, c, e) in [(0.3, 0.3, 0.3), (0.5, 0.3, 0.3)] {
            let weights = ImportanceWeights {
                reference: r,
                centrality: c,
                edit_frequency: e,
            };
            let err = compute_scores(&signals(&[1.0], 1.0, 1.0), &weights).unwrap_err();
            assert!(matches!(err, IndexError::InvalidWeights { .. }));
        }
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = ImportanceWeights {
            reference: 1.2,
            centrality: -0.2,
            edit_frequency: 0.0,
        };
        assert!(weights.validate().is_err());
        assert!(ImportanceEngine::new(weights, 90).is_err());
    }

    #[test]
    fn test_engine_combines_graph_and_history() {
        let chunks = vec![
            ScoringChunk {
                id: "a".into(),
                path: "a.rs".into(),
                ..Default::default()
            },
            ScoringChunk {
                id: "b".into(),
                path: "b.rs".into(),
                ..Default::default()
            },
        ];
        let mut graph = DependencyGraph::from_chunks(&chunks);
        graph.add_edge("a", "b", CALLS, 1.0).unwrap();

        let mut edits = EditFrequencies::new();
        edits.insert(
            "a.rs".into(),
            FileEditFrequency {
                count: 4,
                last_edited: None,
            },
        );

        let engine = ImportanceEngine::new(ImportanceWeights::default(), 90).unwrap();
        let scores = engine.score(&graph, &chunks, &edits).unwrap();

        // a: refs 0, centrality 1, edits 1 -> 0.3 + 0.3
        // b: refs 1, centrality 1, edits 0 -> 0.4 + 0.3
        assert!((scores[0].score - 0.6).abs() < 1e-9);
        assert!((scores[1].score - 0.7).abs() < 1e-9);
        assert_eq!(engine.window(), Duration::days(90));
    }
}

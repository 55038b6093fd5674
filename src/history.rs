//! Git commit history as edit frequencies.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use index_harness_core::models::{EditFrequencies, FileEditFrequency};
use index_harness_core::provider::HistoryProvider;

use crate::connector_git::{git, FIELD_SEP, RECORD_SEP};

/// Counts commits per path with `git log --since --name-only`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitHistoryProvider;

#[async_trait]
impl HistoryProvider for GitHistoryProvider {
    async fn file_edit_frequencies(
        &self,
        path: &Path,
        git_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<EditFrequencies> {
        let repo: PathBuf = path.to_path_buf();
        let git_ref = git_ref.to_string();
        let since_arg = format!("--since={}", since.timestamp());

        let log = tokio::task::spawn_blocking(move || {
            git(
                &repo,
                &[
                    "log",
                    &since_arg,
                    "--format=%x1e%ct",
                    "--name-only",
                    &git_ref,
                ],
            )
        })
        .await
        .context("git log task panicked")??;

        Ok(parse_frequencies(&log))
    }
}

fn parse_frequencies(log: &str) -> EditFrequencies {
    let mut out = EditFrequencies::new();
    for record in log.split(RECORD_SEP).filter(|r| !r.trim().is_empty()) {
        let mut lines = record.lines();
        let Some(header) = lines.next() else { continue };
        let committed = header
            .split(FIELD_SEP)
            .next()
            .and_then(|ts| ts.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        for path in lines.map(str::trim).filter(|l| !l.is_empty()) {
            let entry = out.entry(path.to_string()).or_insert(FileEditFrequency {
                count: 0,
                last_edited: None,
            });
            entry.count += 1;
            if committed > entry.last_edited {
                entry.last_edited = committed;
            }
        }
    }
    out
}

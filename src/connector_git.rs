//! Git document provider.
//!
//! Workflow:
//! 1. Determine a local cache directory for the clone (one per URL).
//! 2. Clone on first use, then fetch the requested ref and check it out
//!    detached.
//! 3. Read HEAD as the version identifier.
//! 4. Collect the last author, commit time, and commit hash of every path
//!    with one `git log --name-only` pass.
//! 5. Walk the checkout (skipping default excludes) into [`Document`]s.
//!
//! Include/exclude globs, size, and binary checks are applied in
//! [`should_ignore`](DocumentProvider::should_ignore) so filtered documents
//! are still recorded in the snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use index_harness_core::models::{CommitInfo, Document, FetchResult, SourceParams};
use index_harness_core::provider::DocumentProvider;

use crate::config::Config;
use crate::connector_fs::{build_globset, is_default_excluded, DocumentFilter};

pub struct GitProvider {
    cache_root: PathBuf,
    default_branch: String,
    filter: DocumentFilter,
}

impl GitProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let git = &config.sources.git;
        let cache_root = match &git.cache_dir {
            Some(dir) => dir.clone(),
            // Default: sibling to the DB file
            None => config
                .db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(".git-cache"),
        };
        Ok(Self {
            cache_root,
            default_branch: git.branch.clone(),
            filter: DocumentFilter {
                include: build_globset(&git.include_globs)?,
                exclude: build_globset(&git.exclude_globs)?,
                max_file_bytes: config.indexing.max_file_bytes,
            },
        })
    }

    fn resolve_ref(&self, params: &SourceParams) -> String {
        params
            .git_ref
            .clone()
            .unwrap_or_else(|| self.default_branch.clone())
    }

    /// Clone directory for `identifier`.
    pub fn checkout_dir(&self, identifier: &str) -> PathBuf {
        self.cache_root.join(short_hash(identifier))
    }
}

#[async_trait]
impl DocumentProvider for GitProvider {
    fn source_type(&self) -> &str {
        "git"
    }

    async fn fetch_documents(&self, params: &SourceParams) -> Result<FetchResult> {
        let url = params.identifier.clone();
        let git_ref = self.resolve_ref(params);
        let dest = self.checkout_dir(&url);

        tokio::task::spawn_blocking(move || fetch_blocking(&url, &git_ref, &dest))
            .await
            .context("git fetch task panicked")?
    }

    fn extract_source_name(&self, identifier: &str) -> String {
        source_name_from_url(identifier)
    }

    fn create_metadata(&self, params: &SourceParams) -> serde_json::Value {
        serde_json::json!({
            "url": params.identifier,
            "ref": self.resolve_ref(params),
        })
    }

    fn should_ignore(&self, document: &Document) -> bool {
        self.filter.should_ignore(document)
    }
}

fn fetch_blocking(url: &str, git_ref: &str, dest: &Path) -> Result<FetchResult> {
    if !dest.join(".git").exists() {
        git_clone(url, dest)?;
    }
    git(dest, &["fetch", "--tags", "origin", git_ref])?;
    git(dest, &["checkout", "--force", "--detach", "FETCH_HEAD"])?;

    let version = git(dest, &["rev-parse", "HEAD"])?;
    let commits = last_commits(dest)?;

    let mut documents = Vec::new();
    let walker = WalkDir::new(dest)
        .into_iter()
        .filter_entry(|e| !is_default_excluded(e.path().strip_prefix(dest).unwrap_or(e.path())));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dest)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let commit = commits.get(&relative).cloned().unwrap_or_default();
        documents.push(Document::new(relative, content, commit));
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!(
        url,
        git_ref,
        version = %version,
        documents = documents.len(),
        "fetched git source"
    );

    Ok(FetchResult {
        documents,
        version,
        workdir: Some(dest.to_path_buf()),
    })
}

fn git_clone(url: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let output = Command::new("git")
        .args(["clone", "--no-checkout", "--quiet"])
        .arg(url)
        .arg(dest)
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }
    Ok(())
}

/// Run a git subcommand in `repo_dir`, returning trimmed stdout.
pub(crate) fn git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .with_context(|| format!("Failed to execute 'git {}'", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Record separator and field separator used in `--format` strings.
pub(crate) const RECORD_SEP: char = '\x1e';
pub(crate) const FIELD_SEP: char = '\x1f';

/// Newest commit touching each path reachable from HEAD.
fn last_commits(repo_dir: &Path) -> Result<HashMap<String, CommitInfo>> {
    let log = git(
        repo_dir,
        &["log", "--format=%x1e%H%x1f%an%x1f%ct", "--name-only", "HEAD"],
    )?;
    Ok(parse_last_commits(&log))
}

fn parse_last_commits(log: &str) -> HashMap<String, CommitInfo> {
    let mut out = HashMap::new();
    for record in log.split(RECORD_SEP).filter(|r| !r.trim().is_empty()) {
        let mut lines = record.lines();
        let Some(header) = lines.next() else { continue };
        let mut fields = header.split(FIELD_SEP);
        let (Some(hash), Some(author), Some(ts)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let info = CommitInfo {
            author: Some(author.to_string()).filter(|a| !a.is_empty()),
            last_edited: ts
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            commit_hash: Some(hash.to_string()),
        };
        // Log is newest first, so the first sighting wins.
        for path in lines.map(str::trim).filter(|l| !l.is_empty()) {
            out.entry(path.to_string()).or_insert_with(|| info.clone());
        }
    }
    out
}

/// `https://github.com/acme/web.git` → `acme/web`,
/// `git@github.com:acme/web.git` → `acme/web`.
pub fn source_name_from_url(identifier: &str) -> String {
    let trimmed = identifier
        .trim()
        .trim_end_matches('/')
        .trim_end_matches(".git");
    let segments: Vec<&str> = trimmed
        .split(['/', ':'])
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        [] => trimmed.to_string(),
        [only] => only.to_string(),
        [.., owner, repo] => format!("{}/{}", owner, repo),
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

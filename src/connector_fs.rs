//! Filesystem document provider and the document filter shared with git.
//!
//! The identifier is a directory path. Its version identifier is a SHA-256
//! over the sorted `(path, content_hash)` list, so an unchanged tree always
//! maps to the same snapshot. Commit metadata comes from file mtimes.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use index_harness_core::models::{CommitInfo, Document, FetchResult, SourceParams};
use index_harness_core::provider::DocumentProvider;

use crate::config::Config;

/// Directory names never descended into.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

pub(crate) fn is_default_excluded(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|n| DEFAULT_EXCLUDED_DIRS.contains(&n)),
        _ => false,
    })
}

/// Decides which fetched documents are recorded but not indexed.
pub(crate) struct DocumentFilter {
    pub include: GlobSet,
    pub exclude: GlobSet,
    pub max_file_bytes: u64,
}

impl DocumentFilter {
    pub fn should_ignore(&self, document: &Document) -> bool {
        document.size > self.max_file_bytes
            || document.content.contains('\0')
            || self.exclude.is_match(&document.path)
            || !self.include.is_match(&document.path)
    }
}

pub struct FilesystemProvider {
    follow_symlinks: bool,
    filter: DocumentFilter,
}

impl FilesystemProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let fs = &config.sources.filesystem;
        Ok(Self {
            follow_symlinks: fs.follow_symlinks,
            filter: DocumentFilter {
                include: build_globset(&fs.include_globs)?,
                exclude: build_globset(&fs.exclude_globs)?,
                max_file_bytes: config.indexing.max_file_bytes,
            },
        })
    }
}

#[async_trait]
impl DocumentProvider for FilesystemProvider {
    fn source_type(&self) -> &str {
        "filesystem"
    }

    async fn fetch_documents(&self, params: &SourceParams) -> Result<FetchResult> {
        let root = PathBuf::from(&params.identifier);
        let follow_symlinks = self.follow_symlinks;
        tokio::task::spawn_blocking(move || scan(&root, follow_symlinks))
            .await
            .context("filesystem scan task panicked")?
    }

    fn extract_source_name(&self, identifier: &str) -> String {
        let trimmed = identifier.trim_end_matches('/');
        std::fs::canonicalize(trimmed)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| trimmed.to_string())
    }

    fn create_metadata(&self, params: &SourceParams) -> serde_json::Value {
        serde_json::json!({ "root": params.identifier })
    }

    fn should_ignore(&self, document: &Document) -> bool {
        self.filter.should_ignore(document)
    }
}

fn scan(root: &Path, follow_symlinks: bool) -> Result<FetchResult> {
    if !root.is_dir() {
        bail!("Filesystem root does not exist: {}", root.display());
    }

    let mut documents = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(follow_symlinks)
        .into_iter()
        .filter_entry(|e| !is_default_excluded(e.path().strip_prefix(root).unwrap_or(e.path())));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let modified: Option<DateTime<Utc>> = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        let commit = CommitInfo {
            author: None,
            last_edited: modified,
            commit_hash: None,
        };
        documents.push(Document::new(
            relative,
            String::from_utf8_lossy(&bytes).into_owned(),
            commit,
        ));
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    let version = tree_version(&documents);
    tracing::info!(
        root = %root.display(),
        version = %version,
        documents = documents.len(),
        "scanned filesystem source"
    );

    Ok(FetchResult {
        documents,
        version,
        workdir: None,
    })
}

/// SHA-256 over the sorted `(path, content_hash)` list.
pub fn tree_version(documents: &[Document]) -> String {
    let mut pairs: Vec<(&str, &str)> = documents
        .iter()
        .map(|d| (d.path.as_str(), d.content_hash.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (path, hash) in pairs {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DocumentFilter {
        DocumentFilter {
            include: build_globset(&["**/*.rs".to_string(), "*.md".to_string()]).unwrap(),
            exclude: build_globset(&["vendor/**".to_string()]).unwrap(),
            max_file_bytes: 16,
        }
    }

    fn doc(path: &str, content: &str) -> Document {
        Document::new(path, content, CommitInfo::default())
    }

    #[test]
    fn test_filter() {
        let f = filter();
        assert!(!f.should_ignore(&doc("src/lib.rs", "fn a() {}")));
        assert!(!f.should_ignore(&doc("README.md", "# hi")));
        assert!(f.should_ignore(&doc("vendor/x.rs", "fn a() {}")));
        assert!(f.should_ignore(&doc("data.csv", "a,b")));
        assert!(f.should_ignore(&doc("src/big.rs", "fn a() { /* long body */ }")));
        assert!(f.should_ignore(&doc("src/bin.rs", "a\0b")));
    }

    #[test]
    fn test_default_excludes() {
        assert!(is_default_excluded(Path::new(".git/config")));
        assert!(is_default_excluded(Path::new("web/node_modules/x/index.js")));
        assert!(!is_default_excluded(Path::new("src/targets.rs")));
    }

    #[test]
    fn test_tree_version_is_order_independent() {
        let a = vec![doc("a.rs", "1"), doc("b.rs", "2")];
        let b = vec![doc("b.rs", "2"), doc("a.rs", "1")];
        assert_eq!(tree_version(&a), tree_version(&b));
        let c = vec![doc("a.rs", "1"), doc("b.rs", "3")];
        assert_ne!(tree_version(&a), tree_version(&c));
    }

    #[test]
    fn test_scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# Title\n").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: main\n").unwrap();

        let result = scan(dir.path(), false).unwrap();
        let paths: Vec<&str> = result.documents.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/lib.rs"]);
        assert!(result.documents[0].commit.last_edited.is_some());
        assert_eq!(result.version, tree_version(&result.documents));
    }
}

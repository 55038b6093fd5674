//! Preparation stage: detect, chunk, embed.
//!
//! Runs before anything is written. Chunking fans out over a bounded
//! [`JoinSet`]; each task owns its document and returns its own
//! [`PrepareStats`], merged at the end. Embedding then runs over every
//! chunk in fixed-size batches.
//!
//! A document that fails to chunk is logged and reported in
//! [`Prepared::failures`]. Any embedding failure aborts the whole stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use index_harness_core::chunk::approx_tokens;
use index_harness_core::embedding::{embed_in_batches, Embedder};
use index_harness_core::language::detect;
use index_harness_core::models::{content_hash, Document, PreparedChunk, PreparedFile, RawChunk};
use index_harness_core::provider::Chunker;

/// Counters for one preparation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrepareStats {
    pub documents: usize,
    pub chunked: usize,
    pub failed: usize,
    pub chunks: usize,
    pub embedded: usize,
}

impl PrepareStats {
    pub fn merge(&mut self, other: PrepareStats) {
        self.documents += other.documents;
        self.chunked += other.chunked;
        self.failed += other.failed;
        self.chunks += other.chunks;
        self.embedded += other.embedded;
    }
}

/// Output of [`Preparer::prepare`].
#[derive(Debug, Default)]
pub struct Prepared {
    /// Sorted by path.
    pub files: Vec<PreparedFile>,
    /// `path → reason` for documents that could not be chunked.
    pub failures: BTreeMap<String, String>,
    pub stats: PrepareStats,
}

struct Chunked {
    document: Document,
    chunks: Vec<RawChunk>,
}

enum ChunkOutcome {
    Ok(Chunked),
    Failed { path: String, reason: String },
}

pub struct Preparer {
    chunker: Arc<dyn Chunker>,
    workers: usize,
    batch_size: usize,
}

impl Preparer {
    pub fn new(chunker: Arc<dyn Chunker>, workers: usize, batch_size: usize) -> Self {
        Self {
            chunker,
            workers: workers.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub async fn prepare(
        &self,
        documents: Vec<Document>,
        embedder: &dyn Embedder,
    ) -> Result<Prepared> {
        let (mut chunked, failures, mut stats) = self.chunk_all(documents).await?;
        chunked.sort_by(|a, b| a.document.path.cmp(&b.document.path));

        let texts: Vec<String> = chunked
            .iter()
            .flat_map(|c| c.chunks.iter().map(|chunk| chunk.content.clone()))
            .collect();

        let vectors: Vec<Vec<f32>> = if texts.is_empty() {
            Vec::new()
        } else {
            embed_in_batches(embedder, &texts, self.batch_size)
                .await
                .context("embedding failed; nothing was written")?
        };
        let mut vectors = vectors.into_iter();
        stats.embedded = texts.len();

        let mut files = Vec::with_capacity(chunked.len());
        for Chunked { document, chunks } in chunked {
            let detected = detect(&document.path);
            let mut prepared = Vec::with_capacity(chunks.len());
            for (ordinal, raw) in chunks.into_iter().enumerate() {
                let vector = vectors
                    .next()
                    .context("embedder returned fewer vectors than chunks")?;
                prepared.push(PreparedChunk {
                    ordinal: ordinal as u32,
                    start_line: raw.start_line,
                    end_line: raw.end_line,
                    content_hash: content_hash(&raw.content),
                    token_count: approx_tokens(&raw.content),
                    content: raw.content,
                    metadata: raw.metadata,
                    vector,
                });
            }
            files.push(PreparedFile {
                path: document.path,
                size: document.size,
                content_type: detected.content_type.to_string(),
                content_hash: document.content_hash,
                language: detected.language.map(str::to_string),
                domain: detected.domain.to_string(),
                commit: document.commit,
                chunks: prepared,
            });
        }

        tracing::info!(
            documents = stats.documents,
            files = files.len(),
            failed = stats.failed,
            chunks = stats.chunks,
            "prepared documents"
        );

        Ok(Prepared {
            files,
            failures,
            stats,
        })
    }

    async fn chunk_all(
        &self,
        documents: Vec<Document>,
    ) -> Result<(Vec<Chunked>, BTreeMap<String, String>, PrepareStats)> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for document in documents {
            let chunker = Arc::clone(&self.chunker);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                let mut stats = PrepareStats {
                    documents: 1,
                    ..Default::default()
                };
                let outcome = match chunker.chunk(&document.path, &document.content) {
                    Ok(chunks) => {
                        stats.chunked = 1;
                        stats.chunks = chunks.len();
                        ChunkOutcome::Ok(Chunked { document, chunks })
                    }
                    Err(e) => {
                        stats.failed = 1;
                        ChunkOutcome::Failed {
                            path: document.path,
                            reason: format!("{:#}", e),
                        }
                    }
                };
                anyhow::Ok((outcome, stats))
            });
        }

        let mut chunked = Vec::new();
        let mut failures = BTreeMap::new();
        let mut stats = PrepareStats::default();

        while let Some(joined) = tasks.join_next().await {
            let (outcome, task_stats) = joined.context("chunking task panicked")??;
            stats.merge(task_stats);
            match outcome {
                ChunkOutcome::Ok(c) => chunked.push(c),
                ChunkOutcome::Failed { path, reason } => {
                    tracing::warn!(path = %path, reason = %reason, "skipping document that failed to chunk");
                    failures.insert(path, reason);
                }
            }
        }

        Ok((chunked, failures, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use index_harness_core::chunk::LineChunker;
    use index_harness_core::models::CommitInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Encodes each text's length so vectors can be matched back to chunks.
    struct LengthEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn batch_embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn embedder(fail: bool) -> LengthEmbedder {
        LengthEmbedder {
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    fn doc(path: &str, content: &str) -> Document {
        Document::new(path, content, CommitInfo::default())
    }

    #[tokio::test]
    async fn test_vectors_follow_their_chunks() {
        let preparer = Preparer::new(Arc::new(LineChunker::new(80)), 2, 2);
        let docs = vec![
            doc("b.rs", "fn b() {}\n\nfn bb() {\n    b();\n}\n"),
            doc("a.md", "# A\n"),
            doc("c.txt", "short\n"),
        ];
        let e = embedder(false);
        let out = preparer.prepare(docs, &e).await.unwrap();

        let paths: Vec<&str> = out.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.rs", "c.txt"]);
        for file in &out.files {
            for chunk in &file.chunks {
                assert_eq!(chunk.vector, vec![chunk.content.len() as f32]);
            }
        }
        assert_eq!(out.stats.chunks, 4);
        assert_eq!(out.stats.embedded, 4);
        // 4 texts in batches of 2
        assert_eq!(e.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.files[1].language.as_deref(), Some("rust"));
        assert_eq!(out.files[1].chunks[1].ordinal, 1);
    }

    #[tokio::test]
    async fn test_chunk_failure_is_skipped() {
        let preparer = Preparer::new(Arc::new(LineChunker::new(80)), 4, 100);
        let docs = vec![doc("ok.txt", "hello\n"), doc("bad.bin", "a\0b")];
        let out = preparer.prepare(docs, &embedder(false)).await.unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.stats.failed, 1);
        assert!(out.failures.contains_key("bad.bin"));
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts() {
        let preparer = Preparer::new(Arc::new(LineChunker::new(80)), 4, 100);
        let result = preparer
            .prepare(vec![doc("ok.txt", "hello\n")], &embedder(true))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_merge() {
        let mut a = PrepareStats {
            documents: 1,
            chunks: 3,
            ..Default::default()
        };
        a.merge(PrepareStats {
            documents: 2,
            failed: 1,
            ..Default::default()
        });
        assert_eq!(a.documents, 3);
        assert_eq!(a.chunks, 3);
        assert_eq!(a.failed, 1);
    }
}

//! Embedder trait, batched embedding, and vector serialization.
//!
//! Concrete HTTP embedders (OpenAI, Ollama) live in the `index-harness`
//! app crate.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::IndexError;

/// Default number of texts per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A backend that turns text into fixed-size vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.batch_embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Embed `texts` in fixed-size batches, preserving index correspondence.
///
/// Any failed batch fails the whole call; no partial output is returned.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let dims = embedder.dims();
    let mut vectors = Vec::with_capacity(texts.len());

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        let out = embedder.batch_embed(batch).await.map_err(|e| {
            e.context(format!(
                "embedding batch {} ({} texts) failed",
                i,
                batch.len()
            ))
        })?;
        if out.len() != batch.len() {
            return Err(IndexError::EmbeddingMismatch {
                expected: batch.len(),
                got: out.len(),
            }
            .into());
        }
        if let Some(bad) = out.iter().find(|v| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                got: bad.len(),
            }
            .into());
        }
        vectors.extend(out);
    }

    Ok(vectors)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use index_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on {
                anyhow::bail!("rate limited");
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: None,
        };
        let vectors = embed_in_batches(&embedder, &texts(250), 100).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(vectors.len(), 250);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], (i + 1) as f32);
        }
    }

    #[tokio::test]
    async fn test_failed_batch_fails_everything() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: Some(1),
        };
        let err = embed_in_batches(&embedder, &texts(250), 100).await.unwrap_err();
        assert!(format!("{:#}", err).contains("rate limited"));
    }

    #[tokio::test]
    async fn test_embed_single_uses_batch() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: None,
        };
        assert_eq!(embedder.embed("abcd").await.unwrap(), vec![4.0]);
    }

    /// Claims 4 dimensions but returns 1.
    struct ShortVectors;

    #[async_trait]
    impl Embedder for ShortVectors {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5]).collect())
        }
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let err = embed_in_batches(&ShortVectors, &texts(3), 2).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::DimensionMismatch { expected: 4, got: 1 })
        ));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }
}

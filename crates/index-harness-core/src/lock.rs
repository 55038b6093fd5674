//! Advisory lock abstraction.
//!
//! A lock manager hands out named, process-external mutual exclusion so
//! that two invocations indexing the same source serialize while
//! unrelated sources proceed independently.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic lock id for a source: the first 8 bytes of
/// SHA-256(`"{source_type}:{identifier}"`) as a big-endian `i64`.
pub fn lock_id(source_type: &str, identifier: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(source_type.as_bytes());
    hasher.update(b":");
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Block until the lock is held, or fail after the manager's timeout.
    async fn acquire(&self, lock_id: i64) -> Result<Box<dyn LockGuard>>;
}

#[async_trait]
pub trait LockGuard: Send {
    fn lock_id(&self) -> i64;

    /// Release the lock. Must be called on every path, including errors.
    async fn release(self: Box<Self>) -> Result<()>;
}

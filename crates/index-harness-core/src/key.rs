//! Deterministic chunk keys.
//!
//! A chunk key identifies a chunk by where it came from rather than by a
//! random id, so re-indexing identical content at the same commit yields
//! byte-identical keys:
//!
//! ```text
//! {product}/{source}/{path}#L{start_line}-L{end_line}@{commit_hash}
//! ```
//!
//! ```rust
//! use index_harness_core::key::chunk_key;
//!
//! let key = chunk_key("docs", "platform", "src/lib.rs", 10, 42, "abc123");
//! assert_eq!(key, "docs/platform/src/lib.rs#L10-L42@abc123");
//! ```

/// Build the stable identity string for a chunk.
pub fn chunk_key(
    product: &str,
    source: &str,
    path: &str,
    start_line: u32,
    end_line: u32,
    commit_hash: &str,
) -> String {
    format!(
        "{}/{}/{}#L{}-L{}@{}",
        product, source, path, start_line, end_line, commit_hash
    )
}

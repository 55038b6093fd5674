//! # Index Harness Core
//!
//! Runtime-agnostic logic for Index Harness: the data model, the Diff
//! Engine, the dependency graph and importance scoring, plus the traits
//! through which the native crate plugs in document providers, chunkers,
//! embedders, history providers, locks, and persistence.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O.

pub mod chunk;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod importance;
pub mod key;
pub mod language;
pub mod lock;
pub mod models;
pub mod provider;
pub mod store;

pub use error::IndexError;

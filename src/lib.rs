//! # Index Harness
//!
//! Incremental, idempotent indexing of versioned source repositories.
//!
//! Each invocation fetches one source, diffs it against the previous indexed
//! snapshot, chunks and embeds only what changed, and commits the result as
//! one snapshot under a per-source lock. A post-commit pass builds a call
//! graph over the source's chunks and writes an importance score to each.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────┐   ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Providers  │──▶│ Diff │──▶│  Prepare    │──▶│   Commit     │──▶│ Importance │
//! │ git / fs   │   │      │   │ chunk+embed │   │ lock + tx    │   │ graph pass │
//! └────────────┘   └──────┘   └─────────────┘   └──────┬───────┘   └─────┬──────┘
//!                                                      ▼                 ▼
//!                                                 ┌─────────────────────────┐
//!                                                 │         SQLite          │
//!                                                 └─────────────────────────┘
//! ```
//!
//! Pure logic (diff, graph, scoring, chunk keys, ports) lives in
//! `index-harness-core`. This crate supplies the native implementations.
//!
//! ## Quick Start
//!
//! ```bash
//! ixh --config ./config/ixh.toml init
//! ixh --config ./config/ixh.toml index git https://github.com/acme/web.git
//! ixh --config ./config/ixh.toml index filesystem ./docs --force
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Persistence ports over SQLite |
//! | [`lock`] | Advisory locks in the shared database |
//! | [`connector_git`] | Git document provider |
//! | [`connector_fs`] | Filesystem document provider |
//! | [`history`] | Git edit frequencies |
//! | [`sources`] | Source-type registry |
//! | [`embedding`] | OpenAI and Ollama embedders |
//! | [`retry`] | Bounded exponential backoff |
//! | [`prepare`] | Chunking and batch embedding |
//! | [`commit`] | Locked, transactional snapshot commit |
//! | [`scoring`] | Post-commit importance pass |
//! | [`ingest`] | Pipeline orchestration |

pub mod commit;
pub mod config;
pub mod connector_fs;
pub mod connector_git;
pub mod db;
pub mod embedding;
pub mod history;
pub mod ingest;
pub mod lock;
pub mod migrate;
pub mod prepare;
pub mod retry;
pub mod scoring;
pub mod sources;
pub mod sqlite_store;

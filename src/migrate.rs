use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file (if needed) and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Sources: one per logical origin, upserted by name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            source_type TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Snapshots: at most one per (source, version)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            version TEXT NOT NULL,
            indexed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            indexed_at INTEGER,
            UNIQUE(source_id, version),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            snapshot_id TEXT NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            language TEXT,
            domain TEXT NOT NULL,
            is_latest INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (source_id) REFERENCES sources(id),
            FOREIGN KEY (snapshot_id) REFERENCES snapshots(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            metadata_json TEXT,
            chunk_key TEXT NOT NULL,
            author TEXT,
            last_edited INTEGER,
            commit_hash TEXT,
            is_latest INTEGER NOT NULL DEFAULT 1,
            importance REAL NOT NULL DEFAULT 0,
            UNIQUE(file_id, ordinal),
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            snapshot_id TEXT NOT NULL,
            from_chunk TEXT NOT NULL,
            to_chunk TEXT NOT NULL,
            relation TEXT NOT NULL,
            weight REAL NOT NULL,
            FOREIGN KEY (from_chunk) REFERENCES chunks(id) ON DELETE CASCADE,
            FOREIGN KEY (to_chunk) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Every document seen by a snapshot, whatever happened to it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshot_files (
            snapshot_id TEXT NOT NULL,
            path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            reason TEXT,
            PRIMARY KEY (snapshot_id, path),
            FOREIGN KEY (snapshot_id) REFERENCES snapshots(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_locks (
            lock_id INTEGER PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_files_source_path ON files(source_id, path, is_latest)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_key ON chunks(chunk_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dependencies_source ON dependencies(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}

//! SQLite-backed [`IndexStore`] implementation.
//!
//! Maps each persistence port onto the schema created by
//! [`migrate`](crate::migrate). Commit-stage writes run inside one sqlx
//! transaction; dropping a [`SqliteTransaction`] without committing rolls
//! it back.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use index_harness_core::embedding::vec_to_blob;
use index_harness_core::models::{
    ChunkMetadata, DependencyEdge, PreparedChunk, PreparedFile, ScoringChunk, Snapshot,
    SnapshotFileRecord, Source,
};
use index_harness_core::store::{ChunkTrace, IndexStore, StoreTransaction};

/// SQLite implementation of [`IndexStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<Snapshot> {
    Ok(Snapshot {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        version: row.try_get("version")?,
        indexed: row.try_get::<i64, _>("indexed")? != 0,
        created_at: row.try_get("created_at")?,
    })
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let metadata_json: String = row.try_get("metadata_json")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_type: row.try_get("source_type")?,
        metadata: serde_json::from_str(&metadata_json)
            .context("corrupt metadata_json in sources")?,
    })
}

const SNAPSHOT_COLUMNS: &str = "id, source_id, version, indexed, created_at";

fn latest_indexed_sql() -> String {
    format!(
        r#"
        SELECT {} FROM snapshots
        WHERE source_id = ? AND indexed = 1
        ORDER BY indexed_at DESC, rowid DESC
        LIMIT 1
        "#,
        SNAPSHOT_COLUMNS
    )
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.context("failed to begin transaction")?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn find_source(&self, name: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, name, source_type, metadata_json FROM sources WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn find_snapshot(&self, source_id: &str, version: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM snapshots WHERE source_id = ? AND version = ?",
            SNAPSHOT_COLUMNS
        ))
        .bind(source_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn latest_indexed_snapshot(&self, source_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&latest_indexed_sql())
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn known_file_hashes(&self, snapshot_id: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            r#"
            SELECT path, content_hash FROM snapshot_files
            WHERE snapshot_id = ? AND outcome IN ('indexed', 'unchanged')
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("path")?, row.try_get("content_hash")?)))
            .collect()
    }

    async fn latest_chunks(&self, source_id: &str) -> Result<Vec<ScoringChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, f.path, c.metadata_json
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE f.source_id = ? AND f.is_latest = 1 AND c.is_latest = 1
            ORDER BY f.path, c.ordinal
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let metadata_json: Option<String> = row.try_get("metadata_json")?;
            let id: String = row.try_get("id")?;
            let metadata: ChunkMetadata = match metadata_json.as_deref() {
                Some(json) => serde_json::from_str(json)
                    .with_context(|| format!("corrupt metadata_json for chunk {}", id))?,
                None => ChunkMetadata::default(),
            };
            chunks.push(ScoringChunk {
                id,
                path: row.try_get("path")?,
                symbol_name: metadata.symbol_name,
                symbol_type: metadata.symbol_type,
                calls: metadata.calls,
            });
        }
        Ok(chunks)
    }

    async fn replace_dependencies(
        &self,
        source_id: &str,
        snapshot_id: &str,
        edges: &[DependencyEdge],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM dependencies WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        for edge in edges {
            sqlx::query(
                r#"
                INSERT INTO dependencies (source_id, snapshot_id, from_chunk, to_chunk, relation, weight)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(source_id)
            .bind(snapshot_id)
            .bind(&edge.from_chunk)
            .bind(&edge.to_chunk)
            .bind(&edge.relation)
            .bind(edge.weight)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_importance(&self, scores: &[(String, f64)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, score) in scores {
            sqlx::query("UPDATE chunks SET importance = ? WHERE id = ?")
                .bind(score)
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// The commit-stage transaction.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn upsert_source(
        &mut self,
        name: &str,
        source_type: &str,
        metadata: &serde_json::Value,
    ) -> Result<Source> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, source_type, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET metadata_json = excluded.metadata_json
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(source_type)
        .bind(metadata.to_string())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query(
            "SELECT id, name, source_type, metadata_json FROM sources WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;
        source_from_row(&row)
    }

    async fn find_snapshot(&mut self, source_id: &str, version: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM snapshots WHERE source_id = ? AND version = ?",
            SNAPSHOT_COLUMNS
        ))
        .bind(source_id)
        .bind(version)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn latest_indexed_snapshot(&mut self, source_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&latest_indexed_sql())
            .bind(source_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn create_snapshot(&mut self, source_id: &str, version: &str) -> Result<Snapshot> {
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            version: version.to_string(),
            indexed: false,
            created_at: chrono::Utc::now().timestamp(),
        };
        sqlx::query(
            "INSERT INTO snapshots (id, source_id, version, indexed, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.source_id)
        .bind(&snapshot.version)
        .bind(snapshot.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(snapshot)
    }

    async fn delete_paths(&mut self, source_id: &str, paths: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for path in paths {
            // Chunks, embeddings, and edges go with the file (ON DELETE CASCADE)
            deleted += sqlx::query(
                "DELETE FROM files WHERE source_id = ? AND path = ? AND is_latest = 1",
            )
            .bind(source_id)
            .bind(path)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        }
        Ok(deleted)
    }

    async fn supersede_paths(&mut self, source_id: &str, paths: &[String]) -> Result<u64> {
        let mut superseded = 0;
        for path in paths {
            sqlx::query(
                r#"
                UPDATE chunks SET is_latest = 0
                WHERE file_id IN (
                    SELECT id FROM files WHERE source_id = ? AND path = ? AND is_latest = 1
                )
                "#,
            )
            .bind(source_id)
            .bind(path)
            .execute(&mut *self.tx)
            .await?;

            superseded += sqlx::query(
                "UPDATE files SET is_latest = 0 WHERE source_id = ? AND path = ? AND is_latest = 1",
            )
            .bind(source_id)
            .bind(path)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        }
        Ok(superseded)
    }

    async fn insert_snapshot_file(
        &mut self,
        snapshot_id: &str,
        record: &SnapshotFileRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshot_files (snapshot_id, path, content_hash, size, outcome, reason)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot_id)
        .bind(&record.path)
        .bind(&record.content_hash)
        .bind(record.size as i64)
        .bind(record.outcome.as_str())
        .bind(&record.reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_file(
        &mut self,
        source_id: &str,
        snapshot_id: &str,
        file: &PreparedFile,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO files (id, source_id, snapshot_id, path, size, content_type,
                               content_hash, language, domain, is_latest)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&id)
        .bind(source_id)
        .bind(snapshot_id)
        .bind(&file.path)
        .bind(file.size as i64)
        .bind(&file.content_type)
        .bind(&file.content_hash)
        .bind(&file.language)
        .bind(&file.domain)
        .execute(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_chunk(
        &mut self,
        file_id: &str,
        chunk: &PreparedChunk,
        trace: &ChunkTrace,
        model: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let metadata_json = chunk
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, file_id, ordinal, start_line, end_line, content, content_hash,
                                token_count, metadata_json, chunk_key, author, last_edited,
                                commit_hash, is_latest)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(file_id)
        .bind(chunk.ordinal as i64)
        .bind(chunk.start_line as i64)
        .bind(chunk.end_line as i64)
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .bind(chunk.token_count as i64)
        .bind(&metadata_json)
        .bind(&trace.chunk_key)
        .bind(&trace.commit.author)
        .bind(trace.commit.last_edited.map(|t| t.timestamp()))
        .bind(&trace.commit.commit_hash)
        .bind(trace.is_latest as i64)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            "INSERT INTO embeddings (chunk_id, model, dims, vector, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(model)
        .bind(chunk.vector.len() as i64)
        .bind(vec_to_blob(&chunk.vector))
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn mark_snapshot_indexed(&mut self, snapshot_id: &str) -> Result<()> {
        sqlx::query("UPDATE snapshots SET indexed = 1, indexed_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(snapshot_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("failed to roll back transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    async fn seed_chunk(store: &SqliteStore, metadata_json: Option<&str>) {
        let pool = store.pool();
        sqlx::query("INSERT INTO sources (id, name, source_type, created_at) VALUES ('s', 'acme/web', 'git', 0)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO snapshots (id, source_id, version, created_at) VALUES ('v', 's', 'abc', 0)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO files (id, source_id, snapshot_id, path, size, content_type, content_hash, domain)
            VALUES ('f', 's', 'v', 'src/lib.rs', 1, 'text/x-rust', 'h', 'code')
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO chunks (id, file_id, ordinal, start_line, end_line, content, content_hash,
                                token_count, metadata_json, chunk_key)
            VALUES ('c', 'f', 0, 1, 3, 'fn run() {}', 'h', 3, ?, 'k')
            "#,
        )
        .bind(metadata_json)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_latest_chunks_reads_metadata() {
        let store = store().await;
        seed_chunk(&store, Some(r#"{"symbol_name":"run","calls":["helper"]}"#)).await;

        let chunks = store.latest_chunks("s").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("run"));
        assert_eq!(chunks[0].calls, vec!["helper".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_chunk_metadata_is_an_error() {
        let store = store().await;
        seed_chunk(&store, Some("{not json")).await;

        let err = store.latest_chunks("s").await.unwrap_err();
        assert!(format!("{:#}", err).contains("corrupt metadata_json for chunk c"));
    }

    #[tokio::test]
    async fn test_corrupt_source_metadata_is_an_error() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO sources (id, name, source_type, metadata_json, created_at) VALUES ('s', 'acme/web', 'git', 'nope', 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.find_source("acme/web").await.unwrap_err();
        assert!(format!("{:#}", err).contains("corrupt metadata_json"));
    }

    #[tokio::test]
    async fn test_transaction_sees_latest_indexed_snapshot() {
        let store = store().await;
        seed_chunk(&store, None).await;
        sqlx::query("UPDATE snapshots SET indexed = 1, indexed_at = 5 WHERE id = 'v'")
            .execute(store.pool())
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let latest = tx.latest_indexed_snapshot("s").await.unwrap().unwrap();
        assert_eq!(latest.id, "v");
        assert!(latest.indexed);
        tx.rollback().await.unwrap();
    }
}

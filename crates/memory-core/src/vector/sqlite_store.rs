//! Vector store sharing the primary sqlite connection. Never closes the
//! connection it borrows — the owning `SqliteBackend` does that.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;

use crate::backend::sqlite::SharedConnection;
use crate::types::VectorResult;

use super::math::{bytes_to_vec, cosine, vec_to_bytes};
use super::store::VectorStore;

#[derive(Debug)]
pub struct SqliteSharedVectorStore {
    conn: SharedConnection,
}

impl SqliteSharedVectorStore {
    pub fn attach(conn: SharedConnection) -> Result<Self> {
        {
            let guard = conn.lock().expect("memory db mutex poisoned");
            guard.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS memory_embeddings (
                    memory_key TEXT PRIMARY KEY,
                    embedding BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )?;
        }
        Ok(Self { conn })
    }
}

#[async_trait]
impl VectorStore for SqliteSharedVectorStore {
    async fn upsert(&self, key: &str, embedding: &[f32]) -> Result<()> {
        let blob = vec_to_bytes(embedding);
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute(
            "
            INSERT INTO memory_embeddings (memory_key, embedding, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(memory_key) DO UPDATE SET
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            ",
            params![key, blob, now],
        )?;
        drop(conn);
        Ok(())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<(String, VectorResult)>> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let mut stmt = conn.prepare("SELECT memory_key, embedding FROM memory_embeddings")?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((key, blob))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut scored: Vec<(String, f32)> = rows
            .into_iter()
            .filter_map(|(key, blob)| {
                let embedding = bytes_to_vec(&blob)?;
                Some((key, cosine(query_embedding, &embedding)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(key, score)| (key, VectorResult { score }))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute("DELETE FROM memory_embeddings WHERE memory_key = ?", params![key])?;
        drop(conn);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |row| row.get(0))?;
        drop(conn);
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;

    #[tokio::test]
    async fn upsert_then_search_finds_nearest() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let store = SqliteSharedVectorStore::attach(backend.shared_connection()).expect("attach");

        store.upsert("north", &[1.0, 0.0, 0.0]).await.expect("upsert");
        store.upsert("east", &[0.0, 1.0, 0.0]).await.expect("upsert");

        let results = store.search(&[0.95, 0.05, 0.0], 2).await.expect("search");
        assert_eq!(results[0].0, "north");
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let store = SqliteSharedVectorStore::attach(backend.shared_connection()).expect("attach");

        store.upsert("k", &[1.0, 0.0]).await.expect("upsert");
        assert_eq!(store.count().await.expect("count"), 1);
        store.delete("k").await.expect("delete");
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn shared_connection_stays_open_after_store_use() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let store = SqliteSharedVectorStore::attach(backend.shared_connection()).expect("attach");
        drop(store);

        // the backend's own connection must still be usable
        assert!(backend.health_check().await);
    }
}

//! Durable outbox for vector-index convergence. Every write that needs a
//! corresponding embedding/vector-store operation is recorded here first, on
//! the same sqlite connection as the primary store, so a crash between the
//! primary write and the embedding call can never silently drop the sync.
//! `drain` walks pending rows in order, retrying with backoff, and gives up
//! on a row only after `MAX_ATTEMPTS`.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use crate::backend::sqlite::SharedConnection;
use crate::types::OutboxOperation;

use super::embedding::EmbeddingProvider;
use super::store::VectorStore;
use super::breaker::CircuitBreaker;

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: i64 = 1_000;

#[derive(Debug)]
pub struct Outbox {
    conn: SharedConnection,
}

struct PendingRow {
    id: i64,
    key: String,
    operation: OutboxOperation,
    attempts: u32,
    content: Option<String>,
}

impl Outbox {
    pub fn attach(conn: SharedConnection) -> Result<Self> {
        {
            let guard = conn.lock().expect("memory db mutex poisoned");
            guard.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS vector_outbox (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    memory_key TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    content TEXT,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at INTEGER NOT NULL
                );
                ",
            )?;
        }
        Ok(Self { conn })
    }

    pub fn enqueue_upsert(&self, key: &str, content: &str) -> Result<()> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute(
            "INSERT INTO vector_outbox (memory_key, operation, content, attempts, next_attempt_at)
             VALUES (?, 'upsert', ?, 0, ?)",
            params![key, content, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn enqueue_delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute(
            "INSERT INTO vector_outbox (memory_key, operation, content, attempts, next_attempt_at)
             VALUES (?, 'delete', NULL, 0, ?)",
            params![key, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vector_outbox", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn due_rows(&self, now: i64, limit: usize) -> Result<Vec<PendingRow>> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, memory_key, operation, content, attempts
             FROM vector_outbox
             WHERE next_attempt_at <= ?
             ORDER BY id ASC
             LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![now, limit as i64], |row| {
                let op: String = row.get(2)?;
                Ok(PendingRow {
                    id: row.get(0)?,
                    key: row.get(1)?,
                    operation: if op == "delete" {
                        OutboxOperation::Delete
                    } else {
                        OutboxOperation::Upsert
                    },
                    content: row.get::<_, Option<String>>(3)?,
                    attempts: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn remove(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute("DELETE FROM vector_outbox WHERE id = ?", params![id])?;
        Ok(())
    }

    fn reschedule(&self, id: i64, attempts: u32) -> Result<()> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let next_attempt_at = Utc::now().timestamp_millis() + BASE_BACKOFF_MS * (1i64 << attempts.min(6));
        conn.execute(
            "UPDATE vector_outbox SET attempts = ?, next_attempt_at = ? WHERE id = ?",
            params![attempts, next_attempt_at, id],
        )?;
        Ok(())
    }

    /// Walks rows due by now in order. Delete operations bypass the breaker.
    /// The first denied upsert halts the whole call: later rows in this
    /// batch are left untouched for the next `drain`. Returns the number of
    /// rows successfully drained.
    pub async fn drain(
        &self,
        provider: &dyn EmbeddingProvider,
        vector_store: &dyn VectorStore,
        breaker: &CircuitBreaker,
    ) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let rows = self.due_rows(now, 256)?;
        let mut drained = 0;

        for row in rows {
            match row.operation {
                OutboxOperation::Delete => {
                    vector_store.delete(&row.key).await?;
                    self.remove(row.id)?;
                    drained += 1;
                    continue;
                }
                OutboxOperation::Upsert => {
                    if !breaker.allow() {
                        debug!(key = %row.key, "outbox drain halted, breaker open");
                        break;
                    }
                    let content = row.content.clone().unwrap_or_default();
                    match provider.embed(&content).await {
                        Ok(embedding) => match vector_store.upsert(&row.key, &embedding).await {
                            Ok(()) => {
                                breaker.record_success();
                                self.remove(row.id)?;
                                drained += 1;
                            }
                            Err(err) => {
                                breaker.record_failure();
                                self.fail_row(&row, err)?;
                            }
                        },
                        Err(err) => {
                            breaker.record_failure();
                            self.fail_row(&row, err)?;
                        }
                    }
                }
            }
        }

        Ok(drained)
    }

    fn fail_row(&self, row: &PendingRow, err: anyhow::Error) -> Result<()> {
        let attempts = row.attempts + 1;
        if attempts >= MAX_ATTEMPTS {
            warn!(key = %row.key, attempts, %err, "outbox entry exceeded max attempts, dropping");
            self.remove(row.id)?;
        } else {
            warn!(key = %row.key, attempts, %err, "outbox entry failed, rescheduling");
            self.reschedule(row.id, attempts)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn peek_attempts(&self, key: &str) -> Option<(i64, u32)> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.query_row(
            "SELECT id, attempts FROM vector_outbox WHERE memory_key = ?",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .expect("query should not fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::vector::embedding::NullEmbeddingProvider;
    use crate::vector::memory_store::InMemoryVectorStore;

    #[tokio::test]
    async fn drain_processes_upsert_with_working_provider() {
        struct FixedProvider;
        #[async_trait::async_trait]
        impl EmbeddingProvider for FixedProvider {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
            fn dimensions(&self) -> usize {
                2
            }
        }

        let backend = SqliteBackend::open_in_memory().expect("open");
        let outbox = Outbox::attach(backend.shared_connection()).expect("attach");
        outbox.enqueue_upsert("k1", "hello world").expect("enqueue");

        let provider = FixedProvider;
        let store = InMemoryVectorStore::default();
        let breaker = CircuitBreaker::new(3, 1_000);

        let drained = outbox.drain(&provider, &store, &breaker).await.expect("drain");
        assert_eq!(drained, 1);
        assert_eq!(outbox.pending_count().expect("count"), 0);
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn failed_embed_reschedules_with_backoff() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let outbox = Outbox::attach(backend.shared_connection()).expect("attach");
        outbox.enqueue_upsert("k1", "hello world").expect("enqueue");

        let provider = NullEmbeddingProvider;
        let store = InMemoryVectorStore::default();
        let breaker = CircuitBreaker::new(10, 1_000);

        let drained = outbox.drain(&provider, &store, &breaker).await.expect("drain");
        assert_eq!(drained, 0);
        let (_, attempts) = outbox.peek_attempts("k1").expect("row still present");
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn row_dropped_after_max_attempts() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let outbox = Outbox::attach(backend.shared_connection()).expect("attach");
        outbox.enqueue_upsert("k1", "hello world").expect("enqueue");

        let provider = NullEmbeddingProvider;
        let store = InMemoryVectorStore::default();
        let breaker = CircuitBreaker::new(100, 1_000);

        for _ in 0..MAX_ATTEMPTS {
            let conn = backend.shared_connection();
            let guard = conn.lock().expect("lock");
            guard
                .execute("UPDATE vector_outbox SET next_attempt_at = 0", [])
                .expect("force due");
            drop(guard);
            outbox.drain(&provider, &store, &breaker).await.expect("drain");
        }

        assert_eq!(outbox.pending_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn open_breaker_skips_upserts() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let outbox = Outbox::attach(backend.shared_connection()).expect("attach");
        outbox.enqueue_upsert("k1", "hello world").expect("enqueue");

        let provider = NullEmbeddingProvider;
        let store = InMemoryVectorStore::default();
        let breaker = CircuitBreaker::new(1, 1_000_000);
        breaker.record_failure();
        assert!(breaker.is_open());

        let drained = outbox.drain(&provider, &store, &breaker).await.expect("drain");
        assert_eq!(drained, 0);
        assert_eq!(outbox.pending_count().expect("count"), 1);
    }

    #[tokio::test]
    async fn denied_upsert_halts_the_rest_of_the_batch() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let outbox = Outbox::attach(backend.shared_connection()).expect("attach");
        outbox.enqueue_upsert("k1", "hello world").expect("enqueue upsert");
        outbox.enqueue_delete("k2").expect("enqueue delete");

        let provider = NullEmbeddingProvider;
        let store = InMemoryVectorStore::default();
        let breaker = CircuitBreaker::new(1, 1_000_000);
        breaker.record_failure();
        assert!(breaker.is_open());

        let drained = outbox.drain(&provider, &store, &breaker).await.expect("drain");
        assert_eq!(drained, 0);
        // The delete after the denied upsert was never reached this call.
        assert_eq!(outbox.pending_count().expect("count"), 2);
    }

    #[tokio::test]
    async fn delete_operations_do_not_consult_breaker() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let outbox = Outbox::attach(backend.shared_connection()).expect("attach");
        outbox.enqueue_delete("k1").expect("enqueue");

        let provider = NullEmbeddingProvider;
        let store = InMemoryVectorStore::default();
        let breaker = CircuitBreaker::new(1, 1_000_000);
        breaker.record_failure();

        let drained = outbox.drain(&provider, &store, &breaker).await.expect("drain");
        assert_eq!(drained, 1);
    }
}

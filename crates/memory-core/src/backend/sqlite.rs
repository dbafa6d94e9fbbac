use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::types::{MemoryCategory, MemoryEntry};

use super::{BackendCapabilities, MemoryBackend};

/// Connection handle shared between the owning `SqliteBackend` and
/// borrowers (the vector store, the outbox). Borrowers must never close it.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// FTS5-backed primary memory backend. Authoritative; keyword search ranks
/// by BM25.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: SharedConnection,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn dt_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Hand out the underlying connection so the vector store and outbox
    /// can attach their tables to the same database file. The returned
    /// handle must never be closed by the borrower.
    pub fn shared_connection(&self) -> SharedConnection {
        Arc::clone(&self.conn)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            category TEXT NOT NULL,
            session_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memory_entries_category ON memory_entries(category);
        CREATE INDEX IF NOT EXISTS idx_memory_entries_session ON memory_entries(session_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS memory_entries_fts USING fts5(
            content,
            content='memory_entries',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS memory_entries_ai AFTER INSERT ON memory_entries BEGIN
            INSERT INTO memory_entries_fts(rowid, content) VALUES (new.id, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS memory_entries_ad AFTER DELETE ON memory_entries BEGIN
            INSERT INTO memory_entries_fts(memory_entries_fts, rowid, content)
            VALUES ('delete', old.id, old.content);
        END;

        CREATE TRIGGER IF NOT EXISTS memory_entries_au AFTER UPDATE ON memory_entries BEGIN
            INSERT INTO memory_entries_fts(memory_entries_fts, rowid, content)
            VALUES ('delete', old.id, old.content);
            INSERT INTO memory_entries_fts(rowid, content) VALUES (new.id, new.content);
        END;
        ",
    )?;
    Ok(())
}

fn fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token.replace('"', " ")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_to_entry(
    id: i64,
    key: String,
    content: String,
    category: String,
    session_id: Option<String>,
    created_at: i64,
) -> MemoryEntry {
    MemoryEntry {
        id: id.to_string(),
        key,
        content,
        category: MemoryCategory::parse(&category),
        timestamp: dt_from_ms(created_at),
        session_id,
        score: None,
    }
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_session_store: true,
            supports_keyword_rank: true,
            supports_transactions: true,
            supports_outbox: true,
        }
    }

    #[instrument(skip(self, content))]
    async fn store(
        &self,
        key: &str,
        content: &str,
        category: MemoryCategory,
        session_id: Option<&str>,
    ) -> Result<()> {
        let now = now_ms();
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute(
            "
            INSERT INTO memory_entries (key, content, category, session_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content = excluded.content,
                category = excluded.category,
                session_id = excluded.session_id,
                updated_at = excluded.updated_at
            ",
            params![key, content, category.as_str(), session_id, now, now],
        )?;
        drop(conn);
        debug!(key, "memory entry stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn recall(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        let fts = fts_query(query);
        if fts.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let mut sql = String::from(
            "
            SELECT m.id, m.key, m.content, m.category, m.session_id, m.created_at
            FROM memory_entries_fts
            JOIN memory_entries m ON m.id = memory_entries_fts.rowid
            WHERE memory_entries_fts MATCH ?
            ",
        );
        if session_id.is_some() {
            sql.push_str(" AND m.session_id = ?");
        }
        sql.push_str(" ORDER BY bm25(memory_entries_fts) LIMIT ?");

        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);

        let rows = if let Some(session_id) = session_id {
            stmt.query_map(params![fts, session_id, limit], |row| {
                Ok(row_to_entry(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![fts, limit], |row| {
                Ok(row_to_entry(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        drop(stmt);
        drop(conn);
        Ok(rows)
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let entry = conn
            .query_row(
                "SELECT id, key, content, category, session_id, created_at FROM memory_entries WHERE key = ?",
                params![key],
                |row| {
                    Ok(row_to_entry(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);
        Ok(entry)
    }

    async fn list(
        &self,
        category: Option<&MemoryCategory>,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        let mut sql = String::from(
            "SELECT id, key, content, category, session_id, created_at FROM memory_entries WHERE 1=1",
        );
        let mut params: Vec<String> = Vec::new();
        if let Some(category) = category {
            sql.push_str(" AND category = ?");
            params.push(category.as_str().to_owned());
        }
        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            params.push(session_id.to_owned());
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(row_to_entry(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        Ok(rows)
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let affected = conn.execute("DELETE FROM memory_entries WHERE key = ?", params![key])?;
        drop(conn);
        Ok(affected > 0)
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entries", [], |row| row.get(0))?;
        drop(conn);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        let Ok(conn) = self.conn.lock() else {
            return false;
        };
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        backend
            .store("zig_pref", "User prefers Zig", MemoryCategory::Core, None)
            .await
            .expect("store");

        let entry = backend.get("zig_pref").await.expect("get").expect("present");
        assert_eq!(entry.content, "User prefers Zig");
        assert_eq!(entry.category, MemoryCategory::Core);
    }

    #[tokio::test]
    async fn store_overwrites_same_key() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        backend
            .store("k", "first", MemoryCategory::Daily, None)
            .await
            .expect("store");
        backend
            .store("k", "second", MemoryCategory::Daily, None)
            .await
            .expect("store");

        assert_eq!(backend.count().await.expect("count"), 1);
        let entry = backend.get("k").await.expect("get").expect("present");
        assert_eq!(entry.content, "second");
    }

    #[tokio::test]
    async fn recall_ranks_by_relevance_and_is_one_based() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        backend
            .store("zig_pref", "User prefers Zig", MemoryCategory::Core, None)
            .await
            .expect("store");
        backend
            .store("rust_note", "Also knows Rust", MemoryCategory::Daily, None)
            .await
            .expect("store");

        let results = backend.recall("zig", 5, None).await.expect("recall");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "zig_pref");
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        backend
            .store("k", "v", MemoryCategory::Core, None)
            .await
            .expect("store");
        assert!(backend.forget("k").await.expect("forget"));
        assert!(backend.get("k").await.expect("get").is_none());
        assert!(!backend.forget("k").await.expect("forget"));
    }

    #[tokio::test]
    async fn list_filters_by_category_and_session() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        backend
            .store("a", "alpha", MemoryCategory::Core, Some("s1"))
            .await
            .expect("store");
        backend
            .store("b", "beta", MemoryCategory::Daily, Some("s2"))
            .await
            .expect("store");

        let core_only = backend
            .list(Some(&MemoryCategory::Core), None)
            .await
            .expect("list");
        assert_eq!(core_only.len(), 1);
        assert_eq!(core_only[0].key, "a");

        let session_only = backend.list(None, Some("s2")).await.expect("list");
        assert_eq!(session_only.len(), 1);
        assert_eq!(session_only[0].key, "b");
    }
}

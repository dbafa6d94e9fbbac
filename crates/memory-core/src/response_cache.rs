//! TTL-bounded cache for assembled retrieval responses, co-located with the
//! primary sqlite database. Keyed by a digest of the query and session so
//! callers don't need to manage cache keys themselves.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::backend::sqlite::SharedConnection;
use crate::config::ResponseCacheConfig;

#[derive(Debug)]
pub struct ResponseCache {
    conn: SharedConnection,
    ttl_ms: i64,
    max_entries: usize,
}

impl ResponseCache {
    pub fn attach(conn: SharedConnection, config: &ResponseCacheConfig) -> Result<Self> {
        {
            let guard = conn.lock().expect("memory db mutex poisoned");
            guard.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS response_cache (
                    cache_key TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL
                );
                ",
            )?;
        }
        Ok(Self {
            conn,
            ttl_ms: (config.ttl_minutes as i64).saturating_mul(60_000),
            max_entries: config.max_entries,
        })
    }

    pub fn cache_key(query: &str, session_id: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(session_id.unwrap_or_default().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, query: &str, session_id: Option<&str>) -> Result<Option<String>> {
        let key = Self::cache_key(query, session_id);
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM response_cache WHERE cache_key = ? AND expires_at > ?",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    pub fn put(&self, query: &str, session_id: Option<&str>, payload: &str) -> Result<()> {
        let key = Self::cache_key(query, session_id);
        let now = Utc::now().timestamp_millis();
        let expires_at = now + self.ttl_ms;

        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute(
            "INSERT INTO response_cache (cache_key, payload, created_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![key, payload, now, expires_at],
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
        if count as usize > self.max_entries {
            let overflow = count as usize - self.max_entries;
            conn.execute(
                "DELETE FROM response_cache WHERE cache_key IN (
                    SELECT cache_key FROM response_cache ORDER BY created_at ASC LIMIT ?
                )",
                params![overflow as i64],
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;

    fn config(ttl_minutes: u64, max_entries: usize) -> ResponseCacheConfig {
        ResponseCacheConfig {
            enabled: true,
            ttl_minutes,
            max_entries,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let cache = ResponseCache::attach(backend.shared_connection(), &config(60, 100)).expect("attach");

        cache.put("zig", Some("s1"), "[]").expect("put");
        let hit = cache.get("zig", Some("s1")).expect("get").expect("present");
        assert_eq!(hit, "[]");

        assert!(cache.get("zig", Some("other_session")).expect("get").is_none());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let cache = ResponseCache::attach(backend.shared_connection(), &config(0, 100)).expect("attach");
        cache.put("zig", None, "[]").expect("put");
        assert!(cache.get("zig", None).expect("get").is_none());
    }

    #[test]
    fn eviction_bounds_entry_count() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let cache = ResponseCache::attach(backend.shared_connection(), &config(60, 2)).expect("attach");
        cache.put("a", None, "[]").expect("put");
        cache.put("b", None, "[]").expect("put");
        cache.put("c", None, "[]").expect("put");

        let conn = backend.shared_connection();
        let guard = conn.lock().expect("lock");
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))
            .expect("count");
        assert!(count <= 2);
    }
}

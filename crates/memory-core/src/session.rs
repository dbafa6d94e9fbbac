//! Append-only per-session message history, used by conversation-category
//! hygiene and snapshot export.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;

use crate::backend::sqlite::SharedConnection;
use crate::types::{MessageEntry, MessageRole};

#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    async fn append(&self, session_id: &str, entry: MessageEntry) -> Result<()>;
    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<MessageEntry>>;
    async fn all_sessions(&self) -> Result<Vec<String>>;
}

#[derive(Debug)]
pub struct SqliteSessionStore {
    conn: SharedConnection,
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Tool => "tool",
    }
}

fn role_from_str(value: &str) -> MessageRole {
    match value {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

impl SqliteSessionStore {
    pub fn attach(conn: SharedConnection) -> Result<Self> {
        {
            let guard = conn.lock().expect("memory db mutex poisoned");
            guard.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS session_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_session_messages_session ON session_messages(session_id);
                ",
            )?;
        }
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn append(&self, session_id: &str, entry: MessageEntry) -> Result<()> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        conn.execute(
            "INSERT INTO session_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            params![
                session_id,
                role_to_str(entry.role),
                entry.content,
                entry.timestamp.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<MessageEntry>> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM session_messages
             WHERE session_id = ? ORDER BY id ASC LIMIT ?",
        )?;
        let limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![session_id, limit], |row| {
                let role: String = row.get(0)?;
                let created_at: i64 = row.get(2)?;
                Ok(MessageEntry {
                    role: role_from_str(&role),
                    content: row.get(1)?,
                    timestamp: dt_from_ms(created_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn all_sessions(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("memory db mutex poisoned");
        let mut stmt = conn.prepare("SELECT DISTINCT session_id FROM session_messages")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn dt_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// In-process session store for backends with no shared sqlite connection
/// to attach a `session_messages` table to (markdown, null, external-sync).
/// History does not survive process restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<MessageEntry>>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, session_id: &str, entry: MessageEntry) -> Result<()> {
        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .entry(session_id.to_owned())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<MessageEntry>> {
        let guard = self.sessions.lock().expect("session store lock poisoned");
        Ok(guard
            .get(session_id)
            .map(|messages| messages.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn all_sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .lock()
            .expect("session store lock poisoned")
            .keys()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;

    #[tokio::test]
    async fn append_then_history_preserves_order() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let store = SqliteSessionStore::attach(backend.shared_connection()).expect("attach");

        store
            .append(
                "s1",
                MessageEntry {
                    role: MessageRole::User,
                    content: "hello".into(),
                    timestamp: Utc::now(),
                },
            )
            .await
            .expect("append");
        store
            .append(
                "s1",
                MessageEntry {
                    role: MessageRole::Assistant,
                    content: "hi there".into(),
                    timestamp: Utc::now(),
                },
            )
            .await
            .expect("append");

        let history = store.history("s1", 10).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn in_memory_store_tracks_sessions_independently() {
        let store = InMemorySessionStore::default();
        store
            .append("a", MessageEntry { role: MessageRole::User, content: "hi".into(), timestamp: Utc::now() })
            .await
            .expect("append");
        store
            .append("b", MessageEntry { role: MessageRole::User, content: "yo".into(), timestamp: Utc::now() })
            .await
            .expect("append");

        assert_eq!(store.history("a", 10).await.expect("history").len(), 1);
        let mut sessions = store.all_sessions().await.expect("sessions");
        sessions.sort();
        assert_eq!(sessions, vec!["a".to_owned(), "b".to_owned()]);
    }
}

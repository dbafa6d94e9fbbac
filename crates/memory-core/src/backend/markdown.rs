//! Flat-file backend: one markdown file per key under a workspace directory.
//! Keyword search is substring matching combined with recency; there is no
//! native rank, so `supports_keyword_rank` is false and order is
//! relevance-then-recency, same as the contract's "substring+recency for
//! markdown" description.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::{MemoryCategory, MemoryEntry};

use super::{BackendCapabilities, MemoryBackend};

#[derive(Debug)]
pub struct MarkdownBackend {
    root: PathBuf,
    // Markdown files on disk are not safe for concurrent writers; serialize
    // writes through an async mutex (reads don't need exclusivity but keep
    // things simple and correct over cleverness).
    lock: Mutex<()>,
}

#[derive(Debug, Clone)]
struct Record {
    key: String,
    content: String,
    category: MemoryCategory,
    session_id: Option<String>,
    timestamp: DateTime<Utc>,
}

fn key_to_filename(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{sanitized}.md")
}

impl MarkdownBackend {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).context("failed to create markdown memory directory")?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key_to_filename(key))
    }

    fn serialize(record: &Record) -> String {
        format!(
            "---\nkey: {}\ncategory: {}\nsession_id: {}\ntimestamp: {}\n---\n{}\n",
            record.key,
            record.category.as_str(),
            record.session_id.as_deref().unwrap_or(""),
            record.timestamp.to_rfc3339(),
            record.content,
        )
    }

    fn deserialize(text: &str) -> Option<Record> {
        let text = text.strip_prefix("---\n")?;
        let (front_matter, body) = text.split_once("---\n")?;

        let mut key = String::new();
        let mut category = MemoryCategory::Core;
        let mut session_id = None;
        let mut timestamp = Utc::now();

        for line in front_matter.lines() {
            let (field, value) = line.split_once(": ")?;
            match field {
                "key" => key = value.to_owned(),
                "category" => category = MemoryCategory::parse(value),
                "session_id" if !value.is_empty() => session_id = Some(value.to_owned()),
                "timestamp" => timestamp = DateTime::parse_from_rfc3339(value).ok()?.with_timezone(&Utc),
                _ => {}
            }
        }

        Some(Record {
            key,
            content: body.trim_end_matches('\n').to_owned(),
            category,
            session_id,
            timestamp,
        })
    }

    fn read_all(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            if let Some(record) = Self::deserialize(&text) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

fn record_to_entry(record: Record) -> MemoryEntry {
    MemoryEntry {
        id: record.key.clone(),
        key: record.key,
        content: record.content,
        category: record.category,
        timestamp: record.timestamp,
        session_id: record.session_id,
        score: None,
    }
}

#[async_trait]
impl MemoryBackend for MarkdownBackend {
    fn name(&self) -> &str {
        "markdown"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_session_store: false,
            supports_keyword_rank: false,
            supports_transactions: false,
            supports_outbox: false,
        }
    }

    async fn store(
        &self,
        key: &str,
        content: &str,
        category: MemoryCategory,
        session_id: Option<&str>,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let record = Record {
            key: key.to_owned(),
            content: content.to_owned(),
            category,
            session_id: session_id.map(str::to_owned),
            timestamp: Utc::now(),
        };
        let path = self.path_for(key);
        std::fs::write(path, Self::serialize(&record))?;
        Ok(())
    }

    async fn recall(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        let needle = query.to_lowercase();
        let mut records = self.read_all()?;
        records.retain(|record| {
            session_id.is_none_or(|s| record.session_id.as_deref() == Some(s))
                && record.content.to_lowercase().contains(&needle)
        });
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit.max(1));
        Ok(records.into_iter().map(record_to_entry).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::deserialize(&text).map(record_to_entry))
    }

    async fn list(
        &self,
        category: Option<&MemoryCategory>,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        let mut records = self.read_all()?;
        records.retain(|record| {
            category.is_none_or(|c| c.as_str() == record.category.as_str())
                && session_id.is_none_or(|s| record.session_id.as_deref() == Some(s))
        });
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records.into_iter().map(record_to_entry).collect())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    async fn health_check(&self) -> bool {
        self.root.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = MarkdownBackend::open(dir.path()).expect("open");
        backend
            .store("note", "remember the milk", MemoryCategory::Daily, Some("s1"))
            .await
            .expect("store");

        let entry = backend.get("note").await.expect("get").expect("present");
        assert_eq!(entry.content, "remember the milk");
        assert_eq!(entry.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn recall_is_substring_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = MarkdownBackend::open(dir.path()).expect("open");
        backend
            .store("a", "loves rust", MemoryCategory::Core, None)
            .await
            .expect("store");
        backend
            .store("b", "loves zig", MemoryCategory::Core, None)
            .await
            .expect("store");

        let results = backend.recall("zig", 10, None).await.expect("recall");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "b");
    }
}

//! Snapshot export: serializes the current entry set and session messages
//! into a self-describing file under the workspace snapshot directory.
//! Idempotent; overwrites the prior snapshot atomically (write-temp + rename).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::MemoryBackend;
use crate::session::SessionStore;
use crate::types::{MemoryEntry, MessageEntry};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;
const SNAPSHOT_FILE_NAME: &str = "memory_snapshot.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub entries: Vec<MemoryEntry>,
    pub sessions: Vec<SessionMessages>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionMessages {
    pub session_id: String,
    pub messages: Vec<MessageEntry>,
}

pub struct SnapshotOperator {
    dir: PathBuf,
}

impl SnapshotOperator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    pub async fn export(
        &self,
        backend: &dyn MemoryBackend,
        session_store: &dyn SessionStore,
    ) -> Result<()> {
        let entries = backend.list(None, None).await?;

        let mut sessions = Vec::new();
        for session_id in session_store.all_sessions().await? {
            let messages = session_store.history(&session_id, usize::MAX).await?;
            sessions.push(SessionMessages { session_id, messages });
        }

        let snapshot = Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entries,
            sessions,
        };

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create snapshot directory {}", self.dir.display()))?;

        let final_path = self.path();
        let tmp_path = self.dir.join(format!("{SNAPSHOT_FILE_NAME}.tmp"));
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&tmp_path, serialized)
            .with_context(|| format!("failed to write snapshot temp file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("failed to rotate snapshot into {}", final_path.display()))?;

        Ok(())
    }

    /// Parses the snapshot file if present and well-formed; never errors on
    /// a missing or malformed file, matching hydrate's conservative policy.
    pub fn try_load(&self) -> Option<Snapshot> {
        let path = self.path();
        if !path.is_file() {
            return None;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub async fn restore(
        &self,
        backend: &dyn MemoryBackend,
        session_store: &dyn SessionStore,
        snapshot: &Snapshot,
    ) -> Result<()> {
        for entry in &snapshot.entries {
            backend
                .store(&entry.key, &entry.content, entry.category.clone(), entry.session_id.as_deref())
                .await?;
        }
        for session in &snapshot.sessions {
            for message in &session.messages {
                session_store.append(&session.session_id, message.clone()).await?;
            }
        }
        Ok(())
    }
}

pub fn snapshot_exists_and_well_formed(dir: &Path) -> bool {
    SnapshotOperator::new(dir).try_load().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::session::SqliteSessionStore;
    use crate::types::MemoryCategory;
    use tempfile::tempdir;

    #[tokio::test]
    async fn export_then_restore_round_trips_entries() {
        let dir = tempdir().expect("tempdir");
        let operator = SnapshotOperator::new(dir.path());

        let backend = SqliteBackend::open_in_memory().expect("open");
        let session_store = SqliteSessionStore::attach(backend.shared_connection()).expect("attach");
        backend.store("a", "alpha", MemoryCategory::Core, None).await.expect("store");
        backend.store("b", "beta", MemoryCategory::Daily, None).await.expect("store");
        backend.store("c", "gamma", MemoryCategory::Daily, None).await.expect("store");

        operator.export(&backend, &session_store).await.expect("export");
        assert!(operator.path().is_file());

        let fresh_backend = SqliteBackend::open_in_memory().expect("open fresh");
        let fresh_sessions = SqliteSessionStore::attach(fresh_backend.shared_connection()).expect("attach");
        let snapshot = operator.try_load().expect("snapshot well-formed");
        operator
            .restore(&fresh_backend, &fresh_sessions, &snapshot)
            .await
            .expect("restore");

        assert_eq!(fresh_backend.count().await.expect("count"), 3);
        assert_eq!(
            fresh_backend.get("b").await.expect("get").expect("present").content,
            "beta"
        );
    }

    #[test]
    fn try_load_returns_none_for_missing_file() {
        let dir = tempdir().expect("tempdir");
        let operator = SnapshotOperator::new(dir.path());
        assert!(operator.try_load().is_none());
    }

    #[test]
    fn try_load_returns_none_for_malformed_file() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(SNAPSHOT_FILE_NAME), "not json").expect("write");
        let operator = SnapshotOperator::new(dir.path());
        assert!(operator.try_load().is_none());
    }
}

//! Archive/purge/conversation-trim maintenance over the primary sqlite
//! store, plus the marker-file due check that gates how often the runtime
//! invokes it. `HygieneOperator::run` only applies one pass given explicit
//! thresholds; `is_due`/`mark_ran` are the scheduling primitives the
//! runtime layer calls around it at init time.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use tracing::info;

use crate::backend::sqlite::SharedConnection;
use crate::config::HygieneConfig;
use crate::types::HygieneReport;

const ARCHIVED_CATEGORY: &str = "archived";
const MARKER_FILE_NAME: &str = ".hygiene_marker";
/// Minimum spacing between hygiene passes. Independent of the
/// archive/purge/conversation-retention thresholds, which govern what a
/// pass does, not how often one runs.
const MIN_INTERVAL_MS: i64 = 24 * 60 * 60 * 1000;

pub fn marker_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(MARKER_FILE_NAME)
}

fn last_run_ms(workspace_dir: &Path) -> Option<i64> {
    std::fs::read_to_string(marker_path(workspace_dir)).ok()?.trim().parse().ok()
}

/// True if the marker file is absent or its last-run timestamp is older
/// than `MIN_INTERVAL_MS`.
pub fn is_due(workspace_dir: &Path, now_ms: i64) -> bool {
    match last_run_ms(workspace_dir) {
        Some(last) => now_ms.saturating_sub(last) >= MIN_INTERVAL_MS,
        None => true,
    }
}

/// Records that a hygiene pass just completed.
pub fn mark_ran(workspace_dir: &Path, now_ms: i64) -> Result<()> {
    std::fs::write(marker_path(workspace_dir), now_ms.to_string())?;
    Ok(())
}

#[derive(Debug)]
pub struct HygieneOperator {
    conn: SharedConnection,
}

impl HygieneOperator {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn run(&self, config: &HygieneConfig) -> Result<HygieneReport> {
        if !config.enabled {
            return Ok(HygieneReport::default());
        }

        let now = Utc::now().timestamp_millis();
        let archive_cutoff = now - days_to_ms(config.archive_after_days);
        let purge_cutoff = now - days_to_ms(config.purge_after_days);
        let conversation_cutoff = now - days_to_ms(config.conversation_retention_days);

        let conn = self.conn.lock().expect("memory db mutex poisoned");

        let archived = conn.execute(
            "UPDATE memory_entries
             SET category = ?
             WHERE category != 'core' AND category != ? AND created_at < ?",
            params![ARCHIVED_CATEGORY, ARCHIVED_CATEGORY, archive_cutoff],
        )?;

        let purged = conn.execute(
            "DELETE FROM memory_entries WHERE created_at < ?",
            params![purge_cutoff],
        )?;

        let conversation_trimmed = conn.execute(
            "DELETE FROM memory_entries WHERE category = 'conversation' AND created_at < ?",
            params![conversation_cutoff],
        )?;

        drop(conn);

        let report = HygieneReport {
            archived,
            purged,
            conversation_trimmed,
        };
        info!(?report, "hygiene pass completed");
        Ok(report)
    }
}

fn days_to_ms(days: i64) -> i64 {
    days.saturating_mul(24 * 60 * 60 * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::backend::MemoryBackend;
    use crate::types::MemoryCategory;
    use rusqlite::params as rparams;

    async fn store_with_age(backend: &SqliteBackend, key: &str, category: MemoryCategory, age_days: i64) {
        backend.store(key, "content", category, None).await.expect("store");
        let conn = backend.shared_connection();
        let guard = conn.lock().expect("lock");
        let created_at = Utc::now().timestamp_millis() - days_to_ms(age_days);
        guard
            .execute(
                "UPDATE memory_entries SET created_at = ? WHERE key = ?",
                rparams![created_at, key],
            )
            .expect("backdate");
    }

    #[tokio::test]
    async fn archives_old_non_core_entries() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        store_with_age(&backend, "old_daily", MemoryCategory::Daily, 10).await;
        store_with_age(&backend, "fresh_daily", MemoryCategory::Daily, 1).await;
        store_with_age(&backend, "old_core", MemoryCategory::Core, 10).await;

        let operator = HygieneOperator::new(backend.shared_connection());
        let report = operator
            .run(&HygieneConfig {
                enabled: true,
                archive_after_days: 7,
                purge_after_days: 365,
                conversation_retention_days: 365,
            })
            .expect("run");

        assert_eq!(report.archived, 1);
        let old_daily = backend.get("old_daily").await.expect("get").expect("present");
        assert_eq!(old_daily.category, MemoryCategory::Custom("archived".into()));
        let old_core = backend.get("old_core").await.expect("get").expect("present");
        assert_eq!(old_core.category, MemoryCategory::Core);
    }

    #[tokio::test]
    async fn purges_and_trims_conversation_entries() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        store_with_age(&backend, "ancient", MemoryCategory::Daily, 400).await;
        store_with_age(&backend, "old_convo", MemoryCategory::Conversation, 40).await;
        store_with_age(&backend, "fresh_convo", MemoryCategory::Conversation, 1).await;

        let operator = HygieneOperator::new(backend.shared_connection());
        let report = operator
            .run(&HygieneConfig {
                enabled: true,
                archive_after_days: 7,
                purge_after_days: 365,
                conversation_retention_days: 30,
            })
            .expect("run");

        assert_eq!(report.purged, 1);
        assert_eq!(report.conversation_trimmed, 1);
        assert!(backend.get("ancient").await.expect("get").is_none());
        assert!(backend.get("old_convo").await.expect("get").is_none());
        assert!(backend.get("fresh_convo").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn disabled_hygiene_is_a_no_op() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        store_with_age(&backend, "old_daily", MemoryCategory::Daily, 999).await;

        let operator = HygieneOperator::new(backend.shared_connection());
        let report = operator
            .run(&HygieneConfig {
                enabled: false,
                archive_after_days: 1,
                purge_after_days: 1,
                conversation_retention_days: 1,
            })
            .expect("run");

        assert_eq!(report, HygieneReport::default());
        assert!(backend.get("old_daily").await.expect("get").is_some());
    }

    #[test]
    fn due_when_marker_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(is_due(dir.path(), 1_000_000));
    }

    #[test]
    fn not_due_immediately_after_mark_ran() {
        let dir = tempfile::tempdir().expect("tempdir");
        mark_ran(dir.path(), 1_000_000).expect("mark");
        assert!(!is_due(dir.path(), 1_000_000 + 1_000));
    }

    #[test]
    fn due_again_after_interval_elapses() {
        let dir = tempfile::tempdir().expect("tempdir");
        mark_ran(dir.path(), 0).expect("mark");
        assert!(is_due(dir.path(), MIN_INTERVAL_MS + 1));
    }
}

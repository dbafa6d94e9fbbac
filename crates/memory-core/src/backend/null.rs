//! The always-empty backend. Useful as a safe default and in tests that
//! exercise the retrieval engine without a real store.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{MemoryCategory, MemoryEntry};

use super::{BackendCapabilities, MemoryBackend};

#[derive(Debug, Default)]
pub struct NullBackend;

#[async_trait]
impl MemoryBackend for NullBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    async fn store(
        &self,
        _key: &str,
        _content: &str,
        _category: MemoryCategory,
        _session_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    async fn recall(
        &self,
        _query: &str,
        _limit: usize,
        _session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        Ok(Vec::new())
    }

    async fn get(&self, _key: &str) -> Result<Option<MemoryEntry>> {
        Ok(None)
    }

    async fn list(
        &self,
        _category: Option<&MemoryCategory>,
        _session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        Ok(Vec::new())
    }

    async fn forget(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_empty() {
        let backend = NullBackend;
        backend
            .store("k", "v", MemoryCategory::Core, None)
            .await
            .expect("store is a no-op");
        assert_eq!(backend.count().await.expect("count"), 0);
        assert!(backend.get("k").await.expect("get").is_none());
    }
}

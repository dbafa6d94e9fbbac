pub mod external_sync;
pub mod markdown;
pub mod null;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{MemoryCategory, MemoryEntry};

/// Capability descriptor published per backend. Consumers query this before
/// opting into features that require it (e.g. the vector plane requires
/// `supports_transactions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    pub supports_session_store: bool,
    pub supports_keyword_rank: bool,
    pub supports_transactions: bool,
    pub supports_outbox: bool,
}

/// Authoritative key -> entry store with keyword search.
#[async_trait]
pub trait MemoryBackend: Send + Sync + std::fmt::Debug {
    /// Stable short identifier used for routing (e.g. `"sqlite"`, `"markdown"`, `"none"`).
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Upsert by `key`. An existing entry with the same key is replaced
    /// atomically from the reader's perspective.
    async fn store(
        &self,
        key: &str,
        content: &str,
        category: MemoryCategory,
        session_id: Option<&str>,
    ) -> Result<()>;

    /// Ordered by backend-native relevance. `session_id = None` searches
    /// across sessions. Order defines 1-based `keyword_rank`.
    async fn recall(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>>;

    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>>;

    /// `category = None` or `session_id = None` mean "any"; both filters AND together.
    async fn list(
        &self,
        category: Option<&MemoryCategory>,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>>;

    async fn forget(&self, key: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;

    async fn health_check(&self) -> bool;
}

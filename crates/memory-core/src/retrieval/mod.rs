pub mod engine;
pub mod markdown_adapter;
pub mod primary_adapter;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::RetrievalCandidate;

pub use engine::RetrievalEngine;
pub use markdown_adapter::MarkdownScanAdapter;
pub use primary_adapter::PrimaryAdapter;

/// A source participating in the keyword-candidate fan-out.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failure of this source is fatal to the whole retrieval call.
    fn is_primary(&self) -> bool;

    async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<RetrievalCandidate>>;

    async fn health_check(&self) -> bool;
}

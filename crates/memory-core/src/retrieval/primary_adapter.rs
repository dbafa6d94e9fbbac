//! Wraps any `MemoryBackend` as a retrieval source. Candidates carry the
//! 1-based `keyword_rank` implied by the backend's own result order.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::backend::MemoryBackend;
use crate::types::{snippet_of, CandidateSource, RetrievalCandidate};

use super::SourceAdapter;

const SNIPPET_CHARS: usize = 160;

#[derive(Debug)]
pub struct PrimaryAdapter {
    backend: Arc<dyn MemoryBackend>,
}

impl PrimaryAdapter {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SourceAdapter for PrimaryAdapter {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn is_primary(&self) -> bool {
        true
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<RetrievalCandidate>> {
        let entries = self.backend.recall(query, limit, session_id).await?;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| RetrievalCandidate {
                id: entry.id,
                key: entry.key,
                snippet: snippet_of(&entry.content, SNIPPET_CHARS),
                content: entry.content,
                category: entry.category,
                keyword_rank: Some(index + 1),
                vector_score: None,
                final_score: 0.0,
                source: CandidateSource::Keyword(self.backend.name().to_owned()),
                source_path: None,
                line_range: None,
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::types::MemoryCategory;

    #[tokio::test]
    async fn candidates_carry_one_based_sequential_rank() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        backend
            .store("a", "alpha beta", MemoryCategory::Core, None)
            .await
            .expect("store");
        backend
            .store("b", "alpha gamma", MemoryCategory::Core, None)
            .await
            .expect("store");

        let adapter = PrimaryAdapter::new(Arc::new(backend));
        let candidates = adapter
            .keyword_candidates("alpha", 10, None)
            .await
            .expect("candidates");

        for (index, candidate) in candidates.iter().enumerate() {
            assert_eq!(candidate.keyword_rank, Some(index + 1));
        }
    }
}

use anyhow::Result;
use async_trait::async_trait;

use crate::types::VectorResult;

/// Persists `{key -> embedding}` and performs brute-force nearest-neighbor
/// search against a query embedding.
#[async_trait]
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    async fn upsert(&self, key: &str, embedding: &[f32]) -> Result<()>;

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<(String, VectorResult)>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

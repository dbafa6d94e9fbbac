//! An in-process vector store, for the null backend and for tests that
//! don't want a sqlite file on disk.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::VectorResult;

use super::math::cosine;
use super::store::VectorStore;

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, key: &str, embedding: &[f32]) -> Result<()> {
        self.entries
            .lock()
            .expect("vector store lock poisoned")
            .insert(key.to_owned(), embedding.to_vec());
        Ok(())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<(String, VectorResult)>> {
        let entries = self.entries.lock().expect("vector store lock poisoned");
        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .map(|(key, embedding)| (key.clone(), cosine(query_embedding, embedding)))
            .collect();
        drop(entries);

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(key, score)| (key, VectorResult { score }))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().expect("vector store lock poisoned").remove(key);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.lock().expect("vector store lock poisoned").len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_upsert_search_delete() {
        let store = InMemoryVectorStore::default();
        store.upsert("a", &[1.0, 0.0]).await.expect("upsert");
        store.upsert("b", &[0.0, 1.0]).await.expect("upsert");

        let results = store.search(&[1.0, 0.0], 1).await.expect("search");
        assert_eq!(results[0].0, "a");

        store.delete("a").await.expect("delete");
        assert_eq!(store.count().await.expect("count"), 1);
    }
}

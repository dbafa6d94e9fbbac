use anyhow::Result;
use async_trait::async_trait;

/// Turns text into a fixed-length vector. Every implementation must return
/// vectors of `dimensions()` length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;
}

/// The required minimum implementation: always fails with a clear error,
/// used when no embedding provider is configured but a caller still wants
/// a concrete `Arc<dyn EmbeddingProvider>` to hand to the runtime.
#[derive(Debug, Default)]
pub struct NullEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("no embedding provider configured")
    }

    fn dimensions(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_provider_always_fails() {
        let provider = NullEmbeddingProvider;
        assert!(provider.embed("hello").await.is_err());
        assert_eq!(provider.dimensions(), 0);
    }
}

//! An embedding provider backed by a hosted embeddings HTTP API.
//!
//! Supports the request/response shapes of the three most common providers
//! plus a generic OpenAI-compatible endpoint for self-hosted servers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::config::EmbeddingConfig;

use super::embedding::EmbeddingProvider;

#[derive(Debug, Clone, Copy)]
enum ProviderKind {
    OpenAiLike,
    Voyage,
    Cohere,
}

#[derive(Debug, Clone)]
struct ProviderSpec {
    provider_name: String,
    endpoint: String,
    api_key_env: String,
    kind: ProviderKind,
}

impl ProviderSpec {
    fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = config.provider.trim().to_ascii_lowercase();

        match provider.as_str() {
            "openai" => Ok(Self {
                provider_name: provider,
                endpoint: "https://api.openai.com/v1/embeddings".to_owned(),
                api_key_env: "OPENAI_API_KEY".to_owned(),
                kind: ProviderKind::OpenAiLike,
            }),
            "voyage" => Ok(Self {
                provider_name: provider,
                endpoint: "https://api.voyageai.com/v1/embeddings".to_owned(),
                api_key_env: "VOYAGE_API_KEY".to_owned(),
                kind: ProviderKind::Voyage,
            }),
            "cohere" => Ok(Self {
                provider_name: provider,
                endpoint: "https://api.cohere.com/v2/embed".to_owned(),
                api_key_env: "COHERE_API_KEY".to_owned(),
                kind: ProviderKind::Cohere,
            }),
            "openai-compatible" => {
                let base_url = config
                    .base_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .context("openai-compatible provider requires embedding.base_url")?;

                anyhow::ensure!(
                    base_url.starts_with("http://") || base_url.starts_with("https://"),
                    "embedding.base_url must start with http:// or https://"
                );

                let api_key_env = config
                    .api_key_env
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .context("openai-compatible provider requires embedding.api_key_env")?;

                Ok(Self {
                    provider_name: provider,
                    endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
                    api_key_env: api_key_env.to_owned(),
                    kind: ProviderKind::OpenAiLike,
                })
            }
            _ => anyhow::bail!(
                "unsupported embedding provider '{}' (supported: openai, voyage, cohere, openai-compatible)",
                config.provider
            ),
        }
    }
}

#[derive(Debug)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    provider: ProviderSpec,
    model: String,
    dimensions: usize,
    api_key: String,
}

impl HttpEmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = ProviderSpec::from_config(config)?;
        let api_key = std::env::var(&provider.api_key_env)
            .with_context(|| format!("{} environment variable not set", provider.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create embedding HTTP client")?;

        Ok(Self {
            client,
            provider,
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key,
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let body = self.request_body(text);

        debug!(
            provider = %self.provider.provider_name,
            model = %self.model,
            text_len = text.len(),
            "memory embedding request"
        );

        let response = self
            .client
            .post(&self.provider.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(
                provider = %self.provider.provider_name,
                model = %self.model,
                status = %status,
                "memory embedding request failed"
            );
            anyhow::bail!("embedding provider error: {status}");
        }

        let embedding = parse_embedding(self.provider.kind, &body_text)?;
        validate_dimensions(self.dimensions, &embedding)?;

        debug!(
            provider = %self.provider.provider_name,
            model = %self.model,
            dimensions = embedding.len(),
            "memory embedding response"
        );

        Ok(embedding)
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        match self.provider.kind {
            ProviderKind::OpenAiLike => json!({
                "model": self.model,
                "input": text,
                "dimensions": self.dimensions,
                "encoding_format": "float"
            }),
            ProviderKind::Voyage => json!({
                "model": self.model,
                "input": [text]
            }),
            ProviderKind::Cohere => json!({
                "model": self.model,
                "texts": [text],
                "input_type": "search_document",
                "embedding_types": ["float"]
            }),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    #[instrument(skip(self, text), fields(provider = %self.provider.provider_name, model = %self.model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request_embedding(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn parse_embedding(kind: ProviderKind, body: &str) -> Result<Vec<f32>> {
    match kind {
        ProviderKind::OpenAiLike | ProviderKind::Voyage => {
            let parsed: OpenAiLikeResponse = serde_json::from_str(body)
                .context("failed to parse openai-like embedding response")?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|entry| entry.embedding)
                .context("embedding response missing data")
        }
        ProviderKind::Cohere => {
            let parsed: CohereResponse =
                serde_json::from_str(body).context("failed to parse cohere embedding response")?;
            parsed.embeddings.first_embedding()
        }
    }
}

fn validate_dimensions(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected {
        anyhow::bail!(
            "embedding dimensions mismatch: expected {}, got {}",
            expected,
            embedding.len()
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct OpenAiLikeResponse {
    data: Vec<OpenAiLikeData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiLikeData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    embeddings: CohereEmbeddings,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CohereEmbeddings {
    Typed { float: Vec<Vec<f32>> },
    Flat(Vec<Vec<f32>>),
}

impl CohereEmbeddings {
    fn first_embedding(self) -> Result<Vec<f32>> {
        match self {
            Self::Typed { float } => float
                .into_iter()
                .next()
                .context("cohere embedding response missing float values"),
            Self::Flat(values) => values
                .into_iter()
                .next()
                .context("cohere embedding response missing values"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_owned(),
            model: "test-model".to_owned(),
            dimensions: 4,
            base_url: None,
            api_key_env: None,
        }
    }

    #[test]
    fn unsupported_provider_rejected() {
        let err = ProviderSpec::from_config(&config("unknown")).expect_err("should reject");
        assert!(err.to_string().contains("unsupported embedding provider"));
    }

    #[test]
    fn provider_spec_supports_cohere() {
        let spec = ProviderSpec::from_config(&config("cohere")).expect("valid");
        assert_eq!(spec.provider_name, "cohere");
        assert_eq!(spec.api_key_env, "COHERE_API_KEY");
    }

    #[test]
    fn openai_compatible_requires_base_url_and_env() {
        let cfg = config("openai-compatible");
        let err = ProviderSpec::from_config(&cfg).expect_err("should reject");
        assert!(err.to_string().contains("base_url"));

        let mut cfg = config("openai-compatible");
        cfg.base_url = Some("https://example.com/v1".to_owned());
        cfg.api_key_env = Some("OPENAI_COMPAT_KEY".to_owned());

        let spec = ProviderSpec::from_config(&cfg).expect("valid");
        assert_eq!(spec.endpoint, "https://example.com/v1/embeddings");
        assert_eq!(spec.api_key_env, "OPENAI_COMPAT_KEY");
    }

    #[test]
    fn parses_openai_like_embedding() {
        let body = r#"{"data":[{"embedding":[0.1,0.2,0.3,0.4]}]}"#;
        let embedding = parse_embedding(ProviderKind::OpenAiLike, body).expect("parses");
        assert_eq!(embedding.len(), 4);
    }

    #[test]
    fn parses_cohere_embedding() {
        let body = r#"{"embeddings":{"float":[[0.1,0.2,0.3,0.4]]}}"#;
        let embedding = parse_embedding(ProviderKind::Cohere, body).expect("parses");
        assert_eq!(embedding.len(), 4);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = validate_dimensions(3, &[0.1, 0.2]).expect_err("should reject");
        assert!(err.to_string().contains("dimensions mismatch"));
    }
}

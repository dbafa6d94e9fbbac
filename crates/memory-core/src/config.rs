//! Configuration surface for the memory subsystem. Mirrors the nesting style
//! of a gateway's `MemoryConfig`: one struct per concern, `#[serde(default)]`
//! throughout so a partial TOML document is always valid.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRuntimeConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub hygiene: HygieneConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub response_cache: ResponseCacheConfig,
}

impl Default for MemoryRuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            hygiene: HygieneConfig::default(),
            snapshot: SnapshotConfig::default(),
            embedding: None,
            hybrid: HybridConfig::default(),
            retrieval: RetrievalConfig::default(),
            rollout: RolloutConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            response_cache: ResponseCacheConfig::default(),
        }
    }
}

impl MemoryRuntimeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub markdown_root: Option<String>,
    #[serde(default)]
    pub external_sync_command: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            db_path: default_db_path(),
            markdown_root: None,
            external_sync_command: None,
        }
    }
}

fn default_backend_kind() -> String {
    "sqlite".to_owned()
}

fn default_db_path() -> String {
    "./memory.db".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HygieneConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: i64,
    #[serde(default = "default_conversation_retention_days")]
    pub conversation_retention_days: i64,
}

impl Default for HygieneConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            archive_after_days: default_archive_after_days(),
            purge_after_days: default_purge_after_days(),
            conversation_retention_days: default_conversation_retention_days(),
        }
    }
}

const fn default_archive_after_days() -> i64 {
    7
}

const fn default_purge_after_days() -> i64 {
    30
}

const fn default_conversation_retention_days() -> i64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub snapshot_on_hygiene: bool,
    #[serde(default = "default_true")]
    pub auto_hydrate: bool,
    #[serde(default = "default_snapshot_dir")]
    pub dir: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            snapshot_on_hygiene: false,
            auto_hydrate: default_true(),
            dir: default_snapshot_dir(),
        }
    }
}

fn default_snapshot_dir() -> String {
    "./snapshots".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

const fn default_embedding_dimensions() -> usize {
    1536
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

const fn default_candidate_multiplier() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            max_results: default_max_results(),
            min_score: 0.0,
        }
    }
}

const fn default_rrf_k() -> u32 {
    60
}

const fn default_max_results() -> usize {
    6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutMode {
    Off,
    Shadow,
    Canary,
    On,
}

impl Default for RolloutMode {
    fn default() -> Self {
        Self::Off
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub mode: RolloutMode,
    #[serde(default)]
    pub canary_hybrid_percent: u32,
    #[serde(default)]
    pub shadow_hybrid_percent: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            mode: RolloutMode::Off,
            canary_hybrid_percent: 0,
            shadow_hybrid_percent: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_breaker_failures")]
    pub failures: u32,
    #[serde(default = "default_breaker_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failures: default_breaker_failures(),
            cooldown_ms: default_breaker_cooldown_ms(),
        }
    }
}

const fn default_breaker_failures() -> u32 {
    3
}

const fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_minutes: default_ttl_minutes(),
            max_entries: default_max_entries(),
        }
    }
}

const fn default_ttl_minutes() -> u64 {
    60
}

const fn default_max_entries() -> usize {
    5_000
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: MemoryRuntimeConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(config.backend.kind, "sqlite");
        assert_eq!(config.retrieval.rrf_k, 60);
        assert!(config.embedding.is_none());
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let toml_src = r#"
            [hygiene]
            archive_after_days = 14

            [embedding]
            provider = "openai"
            model = "text-embedding-3-small"
        "#;
        let config: MemoryRuntimeConfig = toml::from_str(toml_src).expect("parses");
        assert_eq!(config.hygiene.archive_after_days, 14);
        assert_eq!(config.hygiene.purge_after_days, 30);
        let embedding = config.embedding.expect("embedding present");
        assert_eq!(embedding.dimensions, 1536);
    }
}

//! The assembled memory subsystem object. Owns the backend, session store,
//! retrieval engine, and (optionally) the vector plane. `deinit` destroys
//! fields in dependency order: outbox, breaker, vector store, embedding
//! provider, retrieval engine, response cache, primary backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::backend::external_sync::ExternalSyncBackend;
use crate::backend::markdown::MarkdownBackend;
use crate::backend::null::NullBackend;
use crate::backend::sqlite::{SharedConnection, SqliteBackend};
use crate::backend::MemoryBackend;
use crate::config::MemoryRuntimeConfig;
use crate::health;
use crate::lifecycle::{hydrate, hygiene, HygieneOperator, SnapshotOperator};
use crate::response_cache::ResponseCache;
use crate::retrieval::{PrimaryAdapter, RetrievalEngine, RetrievalEngineConfig, SourceAdapter};
use crate::rollout::{RetrievalMode, RolloutPolicy};
use crate::session::{InMemorySessionStore, SessionStore, SqliteSessionStore};
use crate::types::{MemoryCategory, OutboxOperation, RetrievalCandidate};
use crate::vector::{CircuitBreaker, EmbeddingProvider, HttpEmbeddingProvider, NullEmbeddingProvider, Outbox, SqliteSharedVectorStore, VectorStore};

pub const BACKEND_COMPONENT: &str = "memory.backend";
pub const VECTOR_COMPONENT: &str = "memory.vector";

pub struct MemoryRuntime {
    backend: Arc<dyn MemoryBackend>,
    session_store: Arc<dyn SessionStore>,
    retrieval_engine: RetrievalEngine,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    breaker: Option<Arc<CircuitBreaker>>,
    outbox: Option<Outbox>,
    rollout: RolloutPolicy,
    snapshot: SnapshotOperator,
    hygiene: Option<HygieneOperator>,
    response_cache: Option<ResponseCache>,
    config: MemoryRuntimeConfig,
}

/// Opens the configured backend kind, returning its shared sqlite
/// connection when there is one. Only `"sqlite"` has one; the vector plane,
/// outbox, hygiene operator, and response cache all need it and degrade to
/// disabled for the other kinds.
fn open_backend(workspace_dir: &Path, config: &MemoryRuntimeConfig) -> Result<(Arc<dyn MemoryBackend>, Option<SharedConnection>)> {
    match config.backend.kind.as_str() {
        "sqlite" => {
            let db_path = workspace_dir.join(&config.backend.db_path);
            let backend = SqliteBackend::open(&db_path)?;
            let conn = backend.shared_connection();
            Ok((Arc::new(backend), Some(conn)))
        }
        "markdown" => {
            let root = config.backend.markdown_root.as_deref().unwrap_or("./markdown_memory");
            let backend = MarkdownBackend::open(workspace_dir.join(root))?;
            Ok((Arc::new(backend), None))
        }
        "null" => Ok((Arc::new(NullBackend), None)),
        "external_sync" => {
            let command = config
                .backend
                .external_sync_command
                .clone()
                .ok_or_else(|| anyhow::anyhow!("backend.kind = \"external_sync\" requires backend.external_sync_command"))?;
            Ok((Arc::new(ExternalSyncBackend::new(command)), None))
        }
        other => anyhow::bail!("unknown backend kind: {other}"),
    }
}

impl MemoryRuntime {
    pub async fn init(workspace_dir: &Path, config: MemoryRuntimeConfig) -> Result<Self> {
        health::mark_component_ok(BACKEND_COMPONENT);

        let (backend, conn) = open_backend(workspace_dir, &config)?;

        let session_store: Arc<dyn SessionStore> = match &conn {
            Some(conn) => Arc::new(SqliteSessionStore::attach(conn.clone())?),
            None => Arc::new(InMemorySessionStore::default()),
        };

        let (embedding_provider, vector_store, breaker, outbox) = match (&config.embedding, &conn) {
            (Some(embedding_cfg), Some(conn)) => {
                let provider: Arc<dyn EmbeddingProvider> = match HttpEmbeddingProvider::from_config(embedding_cfg) {
                    Ok(provider) => Arc::new(provider),
                    Err(err) => {
                        warn!(%err, "failed to initialize embedding provider, falling back to null provider");
                        Arc::new(NullEmbeddingProvider)
                    }
                };
                let store: Arc<dyn VectorStore> = Arc::new(SqliteSharedVectorStore::attach(conn.clone())?);
                let breaker = Arc::new(CircuitBreaker::new(
                    config.circuit_breaker.failures,
                    config.circuit_breaker.cooldown_ms,
                ));
                let outbox = Outbox::attach(conn.clone())?;
                health::mark_component_ok(VECTOR_COMPONENT);
                (Some(provider), Some(store), Some(breaker), Some(outbox))
            }
            (Some(_), None) => {
                warn!(
                    kind = %config.backend.kind,
                    "embedding configured but this backend kind has no shared connection to attach the vector plane to; running keyword-only"
                );
                (None, None, None, None)
            }
            (None, _) => (None, None, None, None),
        };

        let primary_adapter: Arc<dyn SourceAdapter> = Arc::new(PrimaryAdapter::new(Arc::clone(&backend)));
        let mut engine = RetrievalEngine::new(
            vec![primary_adapter],
            RetrievalEngineConfig {
                hybrid_enabled: config.hybrid.enabled,
                candidate_multiplier: config.hybrid.candidate_multiplier,
                rrf_k: config.retrieval.rrf_k,
                top_k: config.retrieval.max_results,
                min_score: config.retrieval.min_score,
            },
        )
        .with_backfill_backend(Arc::clone(&backend));
        if let (Some(provider), Some(store), Some(breaker)) =
            (&embedding_provider, &vector_store, &breaker)
        {
            engine = engine.with_vector_plane(Arc::clone(provider), Arc::clone(store), Arc::clone(breaker));
        }

        let snapshot_dir = workspace_dir.join(&config.snapshot.dir);
        let snapshot = SnapshotOperator::new(&snapshot_dir);
        let hygiene_operator = conn.as_ref().map(|conn| HygieneOperator::new(conn.clone()));

        let response_cache = match (&conn, config.response_cache.enabled) {
            (Some(conn), true) => Some(ResponseCache::attach(conn.clone(), &config.response_cache)?),
            (None, true) => {
                warn!(kind = %config.backend.kind, "response cache enabled but this backend kind has no shared connection; caching disabled");
                None
            }
            _ => None,
        };

        let mut runtime = Self {
            backend,
            session_store,
            retrieval_engine: engine,
            embedding_provider,
            vector_store,
            breaker,
            outbox,
            rollout: RolloutPolicy::new(&config.rollout),
            snapshot,
            hygiene: hygiene_operator,
            response_cache,
            config,
        };

        if runtime.config.snapshot.auto_hydrate {
            match hydrate::hydrate(runtime.backend.as_ref(), runtime.session_store.as_ref(), &runtime.snapshot).await {
                Ok(true) => debug!("hydrated primary store from snapshot"),
                Ok(false) => {}
                Err(err) => warn!(%err, "hydrate attempt failed"),
            }
        }

        if runtime.config.hygiene.enabled {
            if let Some(operator) = &runtime.hygiene {
                let now_ms = Utc::now().timestamp_millis();
                if hygiene::is_due(workspace_dir, now_ms) {
                    match operator.run(&runtime.config.hygiene) {
                        Ok(report) => {
                            debug!(?report, "init-time hygiene pass completed");
                            if let Err(err) = hygiene::mark_ran(workspace_dir, now_ms) {
                                warn!(%err, "failed to record hygiene marker");
                            }
                        }
                        Err(err) => warn!(%err, "hygiene pass failed"),
                    }
                }
            }
        }

        Ok(runtime)
    }

    pub async fn search(&self, query: &str, limit: usize, session_id: Option<&str>) -> Result<Vec<RetrievalCandidate>> {
        if let Some(cache) = &self.response_cache {
            if let Some(cached) = cache.get(query, session_id)? {
                if let Ok(candidates) = serde_json::from_str(&cached) {
                    return Ok(candidates);
                }
            }
        }

        let limit = Some(limit);
        let result = match self.rollout.decide(session_id) {
            RetrievalMode::KeywordOnly => self.retrieval_engine.search_with_hybrid(query, session_id, false, limit).await,
            RetrievalMode::Hybrid => self.retrieval_engine.search_with_hybrid(query, session_id, true, limit).await,
            RetrievalMode::ShadowHybrid => {
                let keyword_result = self.retrieval_engine.search_with_hybrid(query, session_id, false, limit).await?;
                match self.retrieval_engine.search_with_hybrid(query, session_id, true, limit).await {
                    Ok(hybrid_result) => debug!(
                        keyword_result_count = keyword_result.len(),
                        hybrid_result_count = hybrid_result.len(),
                        "shadow hybrid search recorded"
                    ),
                    Err(err) => warn!(%err, "shadow hybrid search failed, keyword result still served"),
                }
                Ok(keyword_result)
            }
        }?;

        if let Some(cache) = &self.response_cache {
            if let Ok(serialized) = serde_json::to_string(&result) {
                if let Err(err) = cache.put(query, session_id, &serialized) {
                    warn!(%err, "failed to populate response cache");
                }
            }
        }

        Ok(result)
    }

    /// Best-effort embed + upsert; never raises. On failure, enqueues to the
    /// outbox (if configured) and records a breaker failure.
    pub async fn sync_vector_after_store(&self, key: &str, content: &str) {
        let (Some(provider), Some(store), Some(breaker)) =
            (&self.embedding_provider, &self.vector_store, &self.breaker)
        else {
            return;
        };

        if !breaker.allow() {
            self.enqueue_vector_sync(key, OutboxOperation::Upsert, Some(content));
            return;
        }

        match provider.embed(content).await {
            Ok(embedding) => match store.upsert(key, &embedding).await {
                Ok(()) => breaker.record_success(),
                Err(err) => {
                    warn!(%err, key, "vector upsert failed, enqueueing for retry");
                    breaker.record_failure();
                    self.enqueue_vector_sync(key, OutboxOperation::Upsert, Some(content));
                }
            },
            Err(err) => {
                warn!(%err, key, "embedding failed, enqueueing for retry");
                breaker.record_failure();
                self.enqueue_vector_sync(key, OutboxOperation::Upsert, Some(content));
            }
        }
    }

    pub fn enqueue_vector_sync(&self, key: &str, operation: OutboxOperation, content: Option<&str>) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        let result = match operation {
            OutboxOperation::Upsert => outbox.enqueue_upsert(key, content.unwrap_or_default()),
            OutboxOperation::Delete => outbox.enqueue_delete(key),
        };
        if let Err(err) = result {
            warn!(%err, key, "failed to enqueue vector sync");
        }
    }

    pub async fn drain_outbox(&self) -> Result<usize> {
        let (Some(outbox), Some(provider), Some(store), Some(breaker)) = (
            &self.outbox,
            &self.embedding_provider,
            &self.vector_store,
            &self.breaker,
        ) else {
            return Ok(0);
        };
        outbox.drain(provider.as_ref(), store.as_ref(), breaker).await
    }

    pub async fn store(&self, key: &str, content: &str, category: MemoryCategory, session_id: Option<&str>) -> Result<()> {
        if let Err(err) = self.backend.store(key, content, category, session_id).await {
            health::mark_component_error(BACKEND_COMPONENT, &err.to_string());
            return Err(err);
        }
        health::mark_component_ok(BACKEND_COMPONENT);
        self.sync_vector_after_store(key, content).await;
        Ok(())
    }

    /// Runs the hygiene pass (archive/purge/conversation-trim) on demand,
    /// outside the due-check scheduling applied at `init` time. A no-op
    /// returning the default (all-zero) report for backend kinds with no
    /// hygiene operator attached.
    pub fn run_hygiene(&self) -> Result<crate::types::HygieneReport> {
        match &self.hygiene {
            Some(operator) => operator.run(&self.config.hygiene),
            None => Ok(crate::types::HygieneReport::default()),
        }
    }

    /// Exports the current entry set and session history to the snapshot file.
    pub async fn export_snapshot(&self) -> Result<()> {
        self.snapshot.export(self.backend.as_ref(), self.session_store.as_ref()).await
    }

    pub fn backend(&self) -> &dyn MemoryBackend {
        self.backend.as_ref()
    }

    pub fn session_store(&self) -> &dyn SessionStore {
        self.session_store.as_ref()
    }

    /// Tears the runtime down in dependency order: outbox, breaker, vector
    /// store, embedding provider, retrieval engine, response cache, primary
    /// backend. Consumes `self` so no handle can outlive this call.
    pub async fn deinit(self) -> Result<()> {
        let MemoryRuntime {
            backend,
            session_store,
            retrieval_engine,
            embedding_provider,
            vector_store,
            breaker,
            outbox,
            rollout,
            snapshot,
            hygiene,
            response_cache,
            config,
        } = self;

        drop(outbox);
        drop(breaker);
        drop(vector_store);
        drop(embedding_provider);
        drop(retrieval_engine);
        drop(response_cache);
        drop(hygiene);
        drop(session_store);
        drop(rollout);
        drop(snapshot);
        drop(config);
        drop(backend);
        Ok(())
    }
}

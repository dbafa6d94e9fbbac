//! Fans out across source adapters, optionally runs hybrid vector search,
//! and fuses results with Reciprocal Rank Fusion. A clean two-pass
//! score-then-truncate: no in-place mutation while iterating.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::backend::MemoryBackend;
use crate::types::{snippet_of, CandidateSource, RetrievalCandidate};
use crate::vector::{CircuitBreaker, EmbeddingProvider, VectorStore};

use super::SourceAdapter;

const SNIPPET_CHARS: usize = 160;

pub struct RetrievalEngine {
    sources: Vec<Arc<dyn SourceAdapter>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    breaker: Option<Arc<CircuitBreaker>>,
    /// Used to backfill content/snippet for candidates that only came back
    /// from the vector leg (the vector store holds embeddings, not text).
    backfill_backend: Option<Arc<dyn MemoryBackend>>,
    hybrid_enabled: bool,
    candidate_multiplier: usize,
    rrf_k: u32,
    top_k: usize,
    min_score: f32,
}

pub struct RetrievalEngineConfig {
    pub hybrid_enabled: bool,
    pub candidate_multiplier: usize,
    pub rrf_k: u32,
    pub top_k: usize,
    pub min_score: f32,
}

impl RetrievalEngine {
    pub fn new(sources: Vec<Arc<dyn SourceAdapter>>, config: RetrievalEngineConfig) -> Self {
        Self {
            sources,
            embedding_provider: None,
            vector_store: None,
            breaker: None,
            backfill_backend: None,
            hybrid_enabled: config.hybrid_enabled,
            candidate_multiplier: config.candidate_multiplier.max(1),
            rrf_k: config.rrf_k,
            top_k: config.top_k,
            min_score: config.min_score,
        }
    }

    pub fn with_vector_plane(
        mut self,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        self.embedding_provider = Some(embedding_provider);
        self.vector_store = Some(vector_store);
        self.breaker = Some(breaker);
        self
    }

    /// Registers the primary backend so vector-only hits (which carry no
    /// text of their own) can be hydrated with real content before being
    /// returned to a caller.
    pub fn with_backfill_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.backfill_backend = Some(backend);
        self
    }

    pub async fn search(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<RetrievalCandidate>> {
        self.search_with_hybrid(query, session_id, self.hybrid_enabled, None).await
    }

    /// Like `search`, but the caller (typically the rollout policy) decides
    /// whether hybrid is attempted this call, independent of the static
    /// config flag, and may override how many results come back.
    /// Hybrid still requires `hybrid.enabled` at the config level;
    /// `want_hybrid` can only narrow, never widen, that. `top_k_override`
    /// replaces the engine's configured `top_k` for this call only (e.g. a
    /// caller-supplied `--limit`); `None` keeps the configured default.
    pub async fn search_with_hybrid(
        &self,
        query: &str,
        session_id: Option<&str>,
        want_hybrid: bool,
        top_k_override: Option<usize>,
    ) -> Result<Vec<RetrievalCandidate>> {
        if self.sources.is_empty() {
            return Ok(Vec::new());
        }

        let top_k = top_k_override.unwrap_or(self.top_k).max(1);
        let fetch_limit = top_k.saturating_mul(2).max(1);
        let mut keyword_lists: Vec<Vec<RetrievalCandidate>> = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.keyword_candidates(query, fetch_limit, session_id).await {
                Ok(candidates) => keyword_lists.push(candidates),
                Err(err) if source.is_primary() => {
                    return Err(err).map_err(|err| {
                        err.context(format!("primary source '{}' failed", source.name()))
                    });
                }
                Err(err) => {
                    warn!(source = source.name(), %err, "non-primary source failed, treating as empty");
                    keyword_lists.push(Vec::new());
                }
            }
        }

        let vector_list = if want_hybrid {
            self.fetch_vector_candidates(query, top_k).await
        } else {
            None
        };

        let non_empty_keyword_lists = keyword_lists.iter().filter(|list| !list.is_empty()).count();

        let fused = if non_empty_keyword_lists == 1 && vector_list.is_none() {
            rank_only_scores(keyword_lists.into_iter().find(|l| !l.is_empty()).unwrap_or_default(), self.rrf_k)
        } else {
            reciprocal_rank_fusion(keyword_lists, vector_list, self.rrf_k)
        };

        let mut results = truncate_and_filter(fused, self.min_score, top_k);
        self.backfill_vector_only_content(&mut results).await;
        Ok(results)
    }

    async fn fetch_vector_candidates(&self, query: &str, top_k: usize) -> Option<Vec<RetrievalCandidate>> {
        if !self.hybrid_enabled {
            return None;
        }
        let provider = self.embedding_provider.as_ref()?;
        let store = self.vector_store.as_ref()?;
        let breaker = self.breaker.as_ref()?;

        if !breaker.allow() {
            debug!("hybrid search skipped, breaker open");
            return None;
        }

        let embedding = match provider.embed(query).await {
            Ok(embedding) => {
                breaker.record_success();
                embedding
            }
            Err(err) => {
                breaker.record_failure();
                warn!(%err, "query embedding failed, degrading to keyword-only");
                return None;
            }
        };

        let limit = top_k.saturating_mul(self.candidate_multiplier).max(1);
        match store.search(&embedding, limit).await {
            Ok(hits) => Some(
                hits.into_iter()
                    .map(|(key, result)| RetrievalCandidate {
                        id: key.clone(),
                        key,
                        content: String::new(),
                        snippet: String::new(),
                        category: crate::types::MemoryCategory::Core,
                        keyword_rank: None,
                        vector_score: Some(result.score),
                        final_score: 0.0,
                        source: CandidateSource::Vector,
                        source_path: None,
                        line_range: None,
                    })
                    .collect(),
            ),
            Err(err) => {
                warn!(%err, "vector search failed, degrading to keyword-only");
                None
            }
        }
    }

    /// Hydrates content/snippet for any surviving candidate that came back
    /// empty (a vector-only hit never carried text to begin with). Best
    /// effort: a lookup miss or backend error just leaves the candidate
    /// blank rather than failing the whole search.
    async fn backfill_vector_only_content(&self, candidates: &mut [RetrievalCandidate]) {
        let Some(backend) = &self.backfill_backend else {
            return;
        };
        for candidate in candidates.iter_mut() {
            if !candidate.content.is_empty() {
                continue;
            }
            match backend.get(&candidate.key).await {
                Ok(Some(entry)) => {
                    candidate.snippet = snippet_of(&entry.content, SNIPPET_CHARS);
                    candidate.content = entry.content;
                    candidate.category = entry.category;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, key = %candidate.key, "failed to backfill vector-only candidate content");
                }
            }
        }
    }
}

fn rank_only_scores(candidates: Vec<RetrievalCandidate>, rrf_k: u32) -> Vec<RetrievalCandidate> {
    candidates
        .into_iter()
        .map(|mut candidate| {
            let rank = candidate.keyword_rank.unwrap_or(1) as f32;
            candidate.final_score = 1.0 / (rank + rrf_k as f32);
            candidate
        })
        .collect()
}

fn reciprocal_rank_fusion(
    keyword_lists: Vec<Vec<RetrievalCandidate>>,
    vector_list: Option<Vec<RetrievalCandidate>>,
    rrf_k: u32,
) -> Vec<RetrievalCandidate> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut payloads: HashMap<String, RetrievalCandidate> = HashMap::new();

    let mut accumulate = |list: Vec<RetrievalCandidate>| {
        for candidate in list {
            let rank = candidate
                .keyword_rank
                .unwrap_or_else(|| payloads.len() + 1) as f32;
            *scores.entry(candidate.key.clone()).or_insert(0.0) += 1.0 / (rank + rrf_k as f32);
            payloads.entry(candidate.key.clone()).or_insert(candidate);
        }
    };

    for list in keyword_lists {
        accumulate(list);
    }

    if let Some(list) = vector_list {
        // Vector rank is the candidate's position in the vector result list,
        // not a field already set on it.
        for (index, candidate) in list.into_iter().enumerate() {
            let rank = (index + 1) as f32;
            *scores.entry(candidate.key.clone()).or_insert(0.0) += 1.0 / (rank + rrf_k as f32);
            payloads.entry(candidate.key.clone()).or_insert(candidate);
        }
    }

    payloads
        .into_iter()
        .map(|(key, mut candidate)| {
            candidate.final_score = *scores.get(&key).unwrap_or(&0.0);
            candidate
        })
        .collect()
}

fn truncate_and_filter(
    mut candidates: Vec<RetrievalCandidate>,
    min_score: f32,
    top_k: usize,
) -> Vec<RetrievalCandidate> {
    candidates.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.retain(|candidate| candidate.final_score >= min_score);
    candidates.truncate(top_k);
    candidates
}

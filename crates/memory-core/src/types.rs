use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category a memory entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Core,
    Daily,
    Conversation,
    Custom(String),
}

impl MemoryCategory {
    /// Returns the stable string form used in storage and filters.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Core => "core",
            Self::Daily => "daily",
            Self::Conversation => "conversation",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "core" => Self::Core,
            "daily" => Self::Daily,
            "conversation" => Self::Conversation,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single authoritative memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub key: String,
    pub content: String,
    pub category: MemoryCategory,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub score: Option<f32>,
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// One append-only message in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Source tag attached to a retrieval candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateSource {
    /// Named keyword source, identified by its adapter name.
    Keyword(String),
    Vector,
}

/// A single candidate surfaced during retrieval, prior to or after fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub id: String,
    pub key: String,
    pub content: String,
    pub snippet: String,
    pub category: MemoryCategory,
    /// 1-based rank from a keyword source. Mutually exclusive with `vector_score`.
    pub keyword_rank: Option<usize>,
    /// Cosine similarity in [0, 1] from the vector store. Mutually exclusive
    /// with `keyword_rank`.
    pub vector_score: Option<f32>,
    pub final_score: f32,
    pub source: CandidateSource,
    pub source_path: Option<String>,
    pub line_range: Option<(usize, usize)>,
}

/// A nearest-neighbor hit from the vector store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorResult {
    pub score: f32,
}

/// Operation recorded in the durable outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxOperation {
    Upsert,
    Delete,
}

/// A pending vector-sync operation persisted in the outbox table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub key: String,
    pub operation: OutboxOperation,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

/// Health status of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Ok,
    Error,
}

/// Point-in-time health of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub updated_at: DateTime<Utc>,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restart_count: u32,
}

impl ComponentHealth {
    pub fn starting(now: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Starting,
            updated_at: now,
            last_ok: None,
            last_error: None,
            restart_count: 0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Counts produced by a hygiene pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HygieneReport {
    pub archived: usize,
    pub purged: usize,
    pub conversation_trimmed: usize,
}

/// Convert a query's candidate snippet, bounded to a small window around the match.
pub fn snippet_of(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_owned();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}…")
}

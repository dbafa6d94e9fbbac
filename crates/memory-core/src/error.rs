use thiserror::Error;

/// Stable error kinds matched on internally to decide whether a failure
/// propagates, degrades, or is recorded best-effort.
///
/// Public APIs still return `anyhow::Result` (the teacher's convention);
/// callers that need to branch on a specific kind downcast with
/// `error.downcast_ref::<MemoryError>()`.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("backend I/O failed: {0}")]
    BackendIo(#[source] anyhow::Error),

    #[error("unknown backend: {0}")]
    BackendInvalid(String),

    #[error("serialization failed: {0}")]
    Serialization(#[source] anyhow::Error),

    #[error("embedding provider call failed: {0}")]
    EmbeddingFailure(#[source] anyhow::Error),

    #[error("vector store operation failed: {0}")]
    VectorStoreFailure(#[source] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for MemoryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::BackendIo(value.into())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.into())
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(value: std::io::Error) -> Self {
        Self::BackendIo(value.into())
    }
}

//! Hydrate-on-init: conservative restore from a snapshot when the primary
//! store is empty.

use anyhow::Result;

use crate::backend::MemoryBackend;
use crate::session::SessionStore;

use super::snapshot::SnapshotOperator;

/// True only when the store is genuinely empty and a well-formed snapshot
/// exists. Never true otherwise, even if the snapshot file exists but fails
/// to parse.
pub async fn should_hydrate(backend: &dyn MemoryBackend, snapshot: &SnapshotOperator) -> Result<bool> {
    if backend.count().await? != 0 {
        return Ok(false);
    }
    Ok(snapshot.try_load().is_some())
}

pub async fn hydrate(
    backend: &dyn MemoryBackend,
    session_store: &dyn SessionStore,
    snapshot: &SnapshotOperator,
) -> Result<bool> {
    if !should_hydrate(backend, snapshot).await? {
        return Ok(false);
    }
    let Some(loaded) = snapshot.try_load() else {
        return Ok(false);
    };
    snapshot.restore(backend, session_store, &loaded).await?;
    Ok(true)
}

//! A backend that delegates to an external sync tool instead of owning
//! storage itself. Every operation shells out to a configured command with
//! the operation encoded as argv and structured data passed as JSON on
//! stdin/stdout. Useful for integrating a pre-existing note-taking tool or
//! a remote sync daemon without teaching the core about its wire format.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::types::{MemoryCategory, MemoryEntry};

use super::{BackendCapabilities, MemoryBackend};

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct ExternalSyncBackend {
    command: String,
}

#[derive(Serialize)]
struct StoreRequest<'a> {
    op: &'a str,
    key: &'a str,
    content: &'a str,
    category: &'a str,
    session_id: Option<&'a str>,
}

#[derive(Serialize)]
struct RecallRequest<'a> {
    op: &'a str,
    query: &'a str,
    limit: usize,
    session_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireEntry {
    id: String,
    key: String,
    content: String,
    category: String,
    session_id: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<WireEntry> for MemoryEntry {
    fn from(value: WireEntry) -> Self {
        MemoryEntry {
            id: value.id,
            key: value.key,
            content: value.content,
            category: MemoryCategory::parse(&value.category),
            timestamp: value.timestamp,
            session_id: value.session_id,
            score: None,
        }
    }
}

impl ExternalSyncBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn external sync command: {}", self.command))?;

        let payload = serde_json::to_vec(input)?;
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(&payload).await?;
        }

        let output = tokio::time::timeout(SYNC_TIMEOUT, child.wait_with_output())
            .await
            .context("external sync command timed out")??;

        if !output.status.success() {
            anyhow::bail!(
                "external sync command failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        debug!(command = %self.command, "external sync command completed");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MemoryBackend for ExternalSyncBackend {
    fn name(&self) -> &str {
        "external_sync"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_session_store: true,
            supports_keyword_rank: true,
            supports_transactions: false,
            supports_outbox: false,
        }
    }

    async fn store(
        &self,
        key: &str,
        content: &str,
        category: MemoryCategory,
        session_id: Option<&str>,
    ) -> Result<()> {
        let request = StoreRequest {
            op: "store",
            key,
            content,
            category: category.as_str(),
            session_id,
        };
        self.run(&serde_json::to_value(request)?).await?;
        Ok(())
    }

    async fn recall(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        let request = RecallRequest {
            op: "recall",
            query,
            limit,
            session_id,
        };
        let stdout = self.run(&serde_json::to_value(request)?).await?;
        let entries: Vec<WireEntry> = serde_json::from_str(&stdout)
            .context("external sync command returned malformed recall response")?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let request = serde_json::json!({ "op": "get", "key": key });
        let stdout = self.run(&request).await?;
        let entry: Option<WireEntry> = serde_json::from_str(&stdout)
            .context("external sync command returned malformed get response")?;
        Ok(entry.map(Into::into))
    }

    async fn list(
        &self,
        category: Option<&MemoryCategory>,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        let request = serde_json::json!({
            "op": "list",
            "category": category.map(MemoryCategory::as_str),
            "session_id": session_id,
        });
        let stdout = self.run(&request).await?;
        let entries: Vec<WireEntry> = serde_json::from_str(&stdout)
            .context("external sync command returned malformed list response")?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let request = serde_json::json!({ "op": "forget", "key": key });
        let stdout = self.run(&request).await?;
        Ok(stdout.trim() == "true")
    }

    async fn count(&self) -> Result<usize> {
        let request = serde_json::json!({ "op": "count" });
        let stdout = self.run(&request).await?;
        Ok(stdout.trim().parse().unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        let request = serde_json::json!({ "op": "health" });
        self.run(&request).await.is_ok()
    }
}

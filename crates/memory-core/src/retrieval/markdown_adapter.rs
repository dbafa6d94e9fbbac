//! Secondary source that scans a directory of markdown files for
//! cross-source fusion candidates. Never primary: a failure here is logged
//! and treated as an empty list, never fatal to the retrieval call.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::types::{snippet_of, CandidateSource, MemoryCategory, RetrievalCandidate};

use super::SourceAdapter;

const SNIPPET_CHARS: usize = 160;

#[derive(Debug)]
pub struct MarkdownScanAdapter {
    root: PathBuf,
}

impl MarkdownScanAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan(&self, query: &str, limit: usize) -> std::io::Result<Vec<RetrievalCandidate>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let needle = query.to_ascii_lowercase();
        let mut hits = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            for (line_number, line) in content.lines().enumerate() {
                if line.to_ascii_lowercase().contains(&needle) {
                    let key = format!("{}:{}", path.display(), line_number + 1);
                    hits.push(RetrievalCandidate {
                        id: key.clone(),
                        key,
                        snippet: snippet_of(line, SNIPPET_CHARS),
                        content: line.to_owned(),
                        category: MemoryCategory::Custom("markdown_scan".to_owned()),
                        keyword_rank: None,
                        vector_score: None,
                        final_score: 0.0,
                        source: CandidateSource::Keyword("markdown_scan".to_owned()),
                        source_path: Some(path.display().to_string()),
                        line_range: Some((line_number + 1, line_number + 1)),
                    });
                    if hits.len() >= limit {
                        break;
                    }
                }
            }
            if hits.len() >= limit {
                break;
            }
        }

        for (index, hit) in hits.iter_mut().enumerate() {
            hit.keyword_rank = Some(index + 1);
        }

        Ok(hits)
    }
}

#[async_trait]
impl SourceAdapter for MarkdownScanAdapter {
    fn name(&self) -> &str {
        "markdown_scan"
    }

    fn is_primary(&self) -> bool {
        false
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
        _session_id: Option<&str>,
    ) -> Result<Vec<RetrievalCandidate>> {
        match self.scan(query, limit) {
            Ok(hits) => Ok(hits),
            Err(err) => {
                debug!(%err, root = %self.root.display(), "markdown scan failed, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.root.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finds_matching_lines_with_sequential_rank() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("notes.md"), "line about zig\nunrelated\nmore zig here")
            .expect("write");

        let adapter = MarkdownScanAdapter::new(dir.path());
        let candidates = adapter.keyword_candidates("zig", 10, None).await.expect("scan");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].keyword_rank, Some(1));
        assert_eq!(candidates[1].keyword_rank, Some(2));
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_not_error() {
        let adapter = MarkdownScanAdapter::new("/nonexistent/path/for/test");
        let candidates = adapter.keyword_candidates("zig", 10, None).await.expect("scan");
        assert!(candidates.is_empty());
    }
}

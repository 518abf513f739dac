//! JSON file provider.
//!
//! Reads the arXiv export written by the scraper (`papers.json`): either a
//! top-level array of records or an object with a `papers` array.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{PaperProvider, ProviderError, ProviderResult, SourceRecord};

#[derive(Deserialize)]
#[serde(untagged)]
enum PapersFile {
    List(Vec<SourceRecord>),
    Wrapped { papers: Vec<SourceRecord> },
}

/// Provider backed by a JSON file loaded into memory once.
#[derive(Debug, Clone)]
pub struct JsonFilePaperProvider {
    records: Vec<SourceRecord>,
}

impl JsonFilePaperProvider {
    /// Read and parse a papers file.
    ///
    /// # Errors
    /// Returns `ProviderError::IoError` if the file cannot be read and
    /// `ProviderError::ParseError` if it is not in either accepted layout.
    pub async fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(&path).await?;
        let records = Self::parse(&bytes)
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", path.display(), e)))?;
        info!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self { records })
    }

    fn parse(bytes: &[u8]) -> Result<Vec<SourceRecord>, serde_json::Error> {
        Ok(match serde_json::from_slice::<PapersFile>(bytes)? {
            PapersFile::List(records) => records,
            PapersFile::Wrapped { papers } => papers,
        })
    }
}

#[async_trait]
impl PaperProvider for JsonFilePaperProvider {
    async fn fetch_papers(&self) -> ProviderResult<Vec<SourceRecord>> {
        Ok(self.records.clone())
    }

    async fn fetch_papers_limit(&self, limit: usize) -> ProviderResult<Vec<SourceRecord>> {
        Ok(self.records.iter().take(limit).cloned().collect())
    }

    async fn count_papers(&self) -> ProviderResult<usize> {
        Ok(self.records.len())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "id": "2301.00001v1",
            "title": "Graph Networks",
            "authors": ["Ada Lovelace", "Alan Turing"],
            "summary": "Graph networks learn relational structure.",
            "categories": ["cs.LG", "stat.ML"],
            "published": "2023-01-02T03:04:05Z",
            "pdf_url": "ignored"
        },
        {
            "id": "2301.00002v1",
            "title": "No Abstract",
            "authors": ["Grace Hopper"],
            "categories": ["cs.PL"],
            "published": "2023-01-03"
        }
    ]"#;

    #[tokio::test]
    async fn test_from_file_reads_array_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.json");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let provider = JsonFilePaperProvider::from_file(&path).await.unwrap();
        assert_eq!(provider.count_papers().await.unwrap(), 2);

        let records = provider.fetch_papers().await.unwrap();
        assert_eq!(records[0].authors.len(), 2);
        assert_eq!(records[1].summary, "");
        assert!(records.iter().all(|r| r.to_paper().is_ok()));
    }

    #[tokio::test]
    async fn test_wrapped_layout_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.json");
        tokio::fs::write(&path, format!(r#"{{"papers": {}}}"#, SAMPLE))
            .await
            .unwrap();

        let provider = JsonFilePaperProvider::from_file(&path).await.unwrap();
        let first = provider.fetch_papers_limit(1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "2301.00001v1");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            JsonFilePaperProvider::from_file(dir.path().join("absent.json")).await,
            Err(ProviderError::IoError(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.json");
        tokio::fs::write(&path, r#"{"not": "papers"}"#).await.unwrap();
        assert!(matches!(
            JsonFilePaperProvider::from_file(&path).await,
            Err(ProviderError::ParseError(_))
        ));
    }
}

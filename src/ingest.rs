//! Document ingestion: extract → chunk → embed → index.
//!
//! ```text
//! bytes ──▶ extract_pages ──▶ split_pages ──▶ RetrievalPipeline ──▶ index
//! ```
//!
//! With `[ingest].replace_on_upload` (the default) the new chunks swap out
//! everything the collection held; otherwise they are appended. Either way
//! the index changes in a single write, after every chunk is embedded, so a
//! failed upload leaves the collection as it was.
//!
//! Extraction and chunking run under `spawn_blocking`; a panic inside the PDF
//! parser surfaces as an error instead of taking down a runtime worker.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use ragline_core::Collection;

use crate::chunk::split_pages;
use crate::config::Config;
use crate::extract::{extract_pages, DocumentKind};

const TRACING_TARGET: &str = "ragline::ingest";

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub file_name: String,
    pub pages: usize,
    pub chunks: usize,
    /// Records in the collection once the upload is indexed.
    pub document_count: usize,
}

/// Ingest an in-memory document into `collection`.
pub async fn ingest_bytes(
    config: &Config,
    collection: &Collection,
    file_name: &str,
    bytes: impl AsRef<[u8]> + Send + 'static,
) -> Result<IngestReport> {
    let name = file_name.to_string();
    let chunk_size = config.chunking.chunk_size;
    let chunk_overlap = config.chunking.chunk_overlap;
    let (page_count, chunks) = tokio::task::spawn_blocking(move || -> Result<_> {
        let kind = DocumentKind::from_file_name(&name)?;
        let pages = extract_pages(bytes.as_ref(), &name)?;
        let chunks = split_pages(&name, kind, &pages, chunk_size, chunk_overlap);
        Ok((pages.len(), chunks))
    })
    .await
    .context("Extraction task panicked")??;
    let chunk_count = chunks.len();

    tracing::info!(
        target: TRACING_TARGET,
        file_name,
        pages = page_count,
        chunks = chunk_count,
        replace = config.ingest.replace_on_upload,
        "indexing document"
    );

    let pipeline = collection.pipeline();
    if config.ingest.replace_on_upload {
        pipeline.replace_chunks(chunks).await?;
    } else {
        pipeline.index_chunks(chunks).await?;
    }

    Ok(IngestReport {
        file_name: file_name.to_string(),
        pages: page_count,
        chunks: chunk_count,
        document_count: collection.len(),
    })
}

/// Read a file from disk and ingest it under its base name.
pub async fn ingest_file(
    config: &Config,
    collection: &Collection,
    path: &Path,
) -> Result<IngestReport> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;
    ingest_bytes(config, collection, file_name, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{minimal_pdf, ExtractError};
    use async_trait::async_trait;
    use ragline_core::{
        CollectionManager, EmbedderFactory, EmbeddingError, EmbeddingProvider, SessionKey,
    };
    use std::sync::Arc;

    /// Counts of a few fixed words.
    struct WordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for WordEmbedder {
        fn model_name(&self) -> &str {
            "words"
        }
        fn dims(&self) -> Option<usize> {
            Some(3)
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let lower = text.to_lowercase();
            Ok(["revenue", "invoice", "holiday"]
                .iter()
                .map(|w| lower.matches(w).count() as f32)
                .collect())
        }
    }

    struct WordFactory;

    impl EmbedderFactory for WordFactory {
        fn embedder_for(&self, _key: &SessionKey) -> Arc<dyn EmbeddingProvider> {
            Arc::new(WordEmbedder)
        }
    }

    fn collection() -> Arc<Collection> {
        CollectionManager::new(Arc::new(WordFactory)).acquire(&SessionKey::new("k"))
    }

    #[tokio::test]
    async fn test_ingest_text_replaces_by_default() {
        let config = Config::minimal();
        let c = collection();

        let report = ingest_bytes(&config, &c, "a.txt", b"Revenue was up.").await.unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.document_count, 1);

        let report = ingest_bytes(&config, &c, "b.txt", b"Invoices are due.\n\nHoliday on Friday.")
            .await
            .unwrap();
        assert_eq!(report.document_count, report.chunks);

        let hits = c.pipeline().search("revenue", 5, 0.5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_appends_when_configured() {
        let mut config = Config::minimal();
        config.ingest.replace_on_upload = false;
        let c = collection();

        ingest_bytes(&config, &c, "a.txt", b"Revenue was up.").await.unwrap();
        ingest_bytes(&config, &c, "b.md", b"Invoice overdue.").await.unwrap();
        assert_eq!(c.len(), 2);

        let hits = c.pipeline().search("revenue", 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_name.as_deref(), Some("a.txt"));
        assert_eq!(hits[0].metadata.page_label.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_unsupported_file_leaves_collection() {
        let config = Config::minimal();
        let c = collection();
        ingest_bytes(&config, &c, "a.txt", b"Revenue was up.").await.unwrap();

        let err = ingest_bytes(&config, &c, "a.docx", b"PK").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::UnsupportedFileType(_))
        ));
        assert_eq!(c.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_pdf_ingest_on_single_threaded_runtime() {
        let config = Config::minimal();
        let c = collection();

        let report = ingest_bytes(&config, &c, "q3.pdf", minimal_pdf("holiday invoice"))
            .await
            .unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.chunks, 1);

        let hits = c.pipeline().search("invoice", 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_name.as_deref(), Some("q3.pdf"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_malformed_pdf_leaves_collection() {
        let config = Config::minimal();
        let c = collection();
        ingest_bytes(&config, &c, "a.txt", b"Revenue was up.").await.unwrap();

        let err = ingest_bytes(&config, &c, "broken.pdf", b"not a pdf at all")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::Pdf(_))
        ));
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_file_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Holiday schedule.").unwrap();

        let report = ingest_file(&Config::minimal(), &collection(), &path)
            .await
            .unwrap();
        assert_eq!(report.file_name, "notes.txt");
    }
}

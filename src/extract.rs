//! Text extraction collaborator
//!
//! Turning a binary document into raw text is external work; the
//! pipeline only depends on this seam.

use crate::error::PipelineError;
use crate::Result;
use tracing::debug;

/// Trait for raw text extraction from a document on disk
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &str) -> Result<String>;
}

/// Extractor for plain-text documents already on the filesystem
pub struct PlainTextExtractor;

#[async_trait::async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_text(&self, path: &str) -> Result<String> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::ExtractionError(format!("Cannot read document {}: {}", path, e))
        })?;

        if text.trim().is_empty() {
            return Err(PipelineError::ExtractionError(format!(
                "Document {} produced no text",
                path
            )));
        }

        debug!(path = %path, text_length = text.len(), "Text extracted");
        Ok(text)
    }
}

/// Mock extractor for development & testing
pub struct MockExtractor {
    text: Option<String>,
}

impl MockExtractor {
    pub fn returning(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

#[async_trait::async_trait]
impl TextExtractor for MockExtractor {
    async fn extract_text(&self, path: &str) -> Result<String> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => Err(PipelineError::ExtractionError(format!(
                "Unreadable document: {}",
                path
            ))),
        }
    }
}

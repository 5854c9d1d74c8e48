//! Knowledge store and vector index collaborators
//!
//! The pipeline upserts validated records into a knowledge store and
//! best-effort indexes them for semantic search. Both engines are
//! external; only these seams are depended on.

use crate::error::PipelineError;
use crate::models::DocumentRecord;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for the knowledge store's write path
#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Upsert a validated record, returning the store's record id.
    async fn upsert(&self, record: &DocumentRecord) -> Result<String>;
}

/// Trait for the best-effort vector index
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index(&self, id: &str, text: &str, metadata: Value) -> Result<()>;
}

/// In-memory knowledge store for development & testing
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    records: Arc<RwLock<HashMap<String, DocumentRecord>>>,
    fail: bool,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose upserts always fail, for degradation tests.
    pub fn failing() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            fail: true,
        }
    }

    pub async fn get(&self, id: &str) -> Option<DocumentRecord> {
        let records = self.records.read().await;
        records.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        let records = self.records.read().await;
        records.len()
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn upsert(&self, record: &DocumentRecord) -> Result<String> {
        if self.fail {
            return Err(PipelineError::GraphError(
                "Knowledge store unavailable".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let mut records = self.records.write().await;
        records.insert(id.clone(), record.clone());
        Ok(id)
    }
}

/// In-memory vector index for development & testing
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<Vec<(String, String, Value)>>>,
    fail: bool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            fail: true,
        }
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn index(&self, id: &str, text: &str, metadata: Value) -> Result<()> {
        if self.fail {
            return Err(PipelineError::VectorIndexError(
                "Vector index unavailable".to_string(),
            ));
        }

        let mut entries = self.entries.write().await;
        entries.push((id.to_string(), text.to_string(), metadata));
        Ok(())
    }
}

//! Durable workflow state store
//!
//! Every checkpoint fully overwrites one row per document id. The
//! in-memory store backs tests and the demo binary; Postgres is the
//! production backend.

use crate::error::PipelineError;
use crate::models::{RiskLevel, WorkflowStatus};
use crate::state::WorkflowState;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Persisted envelope around a state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub document_id: Uuid,
    pub status: WorkflowStatus,
    pub paused: bool,
    pub risk_level: Option<RiskLevel>,
    pub retry_count: u32,
    pub state: WorkflowState,
    pub state_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trait for workflow state persistence
#[async_trait::async_trait]
pub trait WorkflowStateStore: Send + Sync {
    /// Checkpoint: overwrite the document's row with the full snapshot.
    async fn save(&self, state: &WorkflowState) -> Result<()>;
    async fn get(&self, document_id: Uuid) -> Result<Option<StoredWorkflow>>;
    async fn list_quarantined(&self) -> Result<Vec<StoredWorkflow>>;
    async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<StoredWorkflow>>;
    async fn list_by_risk(&self, risk: RiskLevel) -> Result<Vec<StoredWorkflow>>;
    async fn delete(&self, document_id: Uuid) -> Result<()>;
}

/// SHA256 of the serialized snapshot, streamed without an intermediate
/// String.
pub fn compute_state_hash(state: &WorkflowState) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), state).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//
// ================= In-Memory Store =================
//

/// In-memory state store for development & testing
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    rows: Arc<RwLock<HashMap<Uuid, StoredWorkflow>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WorkflowStateStore for InMemoryWorkflowStore {
    async fn save(&self, state: &WorkflowState) -> Result<()> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;

        let created_at = rows
            .get(&state.document_id)
            .map(|row| row.created_at)
            .unwrap_or(now);

        rows.insert(
            state.document_id,
            StoredWorkflow {
                document_id: state.document_id,
                status: state.status,
                paused: state.paused,
                risk_level: state.risk_level,
                retry_count: state.retry_count,
                state: state.clone(),
                state_hash: compute_state_hash(state),
                created_at,
                updated_at: now,
            },
        );

        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<StoredWorkflow>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&document_id).cloned())
    }

    async fn list_quarantined(&self) -> Result<Vec<StoredWorkflow>> {
        let rows = self.rows.read().await;
        Ok(sorted(rows.values().filter(|row| row.paused).cloned()))
    }

    async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<StoredWorkflow>> {
        let rows = self.rows.read().await;
        Ok(sorted(
            rows.values().filter(|row| row.status == status).cloned(),
        ))
    }

    async fn list_by_risk(&self, risk: RiskLevel) -> Result<Vec<StoredWorkflow>> {
        let rows = self.rows.read().await;
        Ok(sorted(
            rows.values()
                .filter(|row| row.risk_level == Some(risk))
                .cloned(),
        ))
    }

    async fn delete(&self, document_id: Uuid) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.remove(&document_id);
        Ok(())
    }
}

fn sorted(rows: impl Iterator<Item = StoredWorkflow>) -> Vec<StoredWorkflow> {
    let mut rows: Vec<_> = rows.collect();
    rows.sort_by_key(|row| std::cmp::Reverse(row.updated_at));
    rows
}

//
// ================= Postgres Store =================
//

/// Postgres-backed state store
pub struct PostgresWorkflowStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresWorkflowStore {
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                PipelineError::DatabaseError(format!("Failed to create Postgres pool: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS workflow_states (
                      document_id UUID PRIMARY KEY,
                      status TEXT NOT NULL,
                      paused BOOLEAN NOT NULL DEFAULT FALSE,
                      risk_level TEXT,
                      retry_count INTEGER NOT NULL DEFAULT 0,
                      state_json TEXT NOT NULL,
                      state_hash TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_workflow_states_status
                    ON workflow_states (status, updated_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                PipelineError::DatabaseError(format!(
                    "Failed to initialize workflow state schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    async fn fetch_where(
        &self,
        clause: &str,
        bind: Option<&str>,
    ) -> Result<Vec<StoredWorkflow>> {
        self.ensure_schema().await?;

        let sql = format!(
            "SELECT * FROM workflow_states WHERE {} ORDER BY updated_at DESC",
            clause
        );

        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            PipelineError::DatabaseError(format!("Failed to list workflow states: {}", e))
        })?;

        rows.iter().map(row_to_stored).collect()
    }
}

#[async_trait::async_trait]
impl WorkflowStateStore for PostgresWorkflowStore {
    async fn save(&self, state: &WorkflowState) -> Result<()> {
        self.ensure_schema().await?;

        let state_json = serde_json::to_string(state)?;
        let state_hash = compute_state_hash(state);

        sqlx::query(
            r#"
            INSERT INTO workflow_states
                (document_id, status, paused, risk_level, retry_count, state_json, state_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (document_id) DO UPDATE SET
                status      = EXCLUDED.status,
                paused      = EXCLUDED.paused,
                risk_level  = EXCLUDED.risk_level,
                retry_count = EXCLUDED.retry_count,
                state_json  = EXCLUDED.state_json,
                state_hash  = EXCLUDED.state_hash,
                updated_at  = NOW()
            "#,
        )
        .bind(state.document_id)
        .bind(state.status.as_str())
        .bind(state.paused)
        .bind(state.risk_level.map(|r| r.as_str()))
        .bind(state.retry_count as i32)
        .bind(&state_json)
        .bind(&state_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            PipelineError::DatabaseError(format!("Failed to save workflow state: {}", e))
        })?;

        info!(
            document_id = %state.document_id,
            status = %state.status,
            "Workflow state saved"
        );

        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<StoredWorkflow>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT * FROM workflow_states WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                PipelineError::DatabaseError(format!("Failed to load workflow state: {}", e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stored = row_to_stored(&row)?;

        // Flag snapshots that do not hash to what was written.
        let recomputed = compute_state_hash(&stored.state);
        if recomputed != stored.state_hash {
            warn!(
                document_id = %document_id,
                "Workflow snapshot hash mismatch on load"
            );
        }

        Ok(Some(stored))
    }

    async fn list_quarantined(&self) -> Result<Vec<StoredWorkflow>> {
        self.fetch_where("paused = TRUE", None).await
    }

    async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<StoredWorkflow>> {
        self.fetch_where("status = $1", Some(status.as_str())).await
    }

    async fn list_by_risk(&self, risk: RiskLevel) -> Result<Vec<StoredWorkflow>> {
        self.fetch_where("risk_level = $1", Some(risk.as_str())).await
    }

    async fn delete(&self, document_id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM workflow_states WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                PipelineError::DatabaseError(format!("Failed to delete workflow state: {}", e))
            })?;

        Ok(())
    }
}

fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredWorkflow> {
    let status_raw: String = row
        .try_get("status")
        .map_err(|e| PipelineError::DatabaseError(e.to_string()))?;
    let status = WorkflowStatus::parse(&status_raw).ok_or_else(|| {
        PipelineError::DatabaseError(format!("Unknown workflow status: {}", status_raw))
    })?;

    let risk_raw: Option<String> = row
        .try_get("risk_level")
        .map_err(|e| PipelineError::DatabaseError(e.to_string()))?;
    let risk_level = risk_raw.as_deref().and_then(RiskLevel::parse);

    let retry_count: i32 = row
        .try_get("retry_count")
        .map_err(|e| PipelineError::DatabaseError(e.to_string()))?;

    let state_json: String = row
        .try_get("state_json")
        .map_err(|e| PipelineError::DatabaseError(e.to_string()))?;
    let state: WorkflowState = serde_json::from_str(&state_json)?;

    Ok(StoredWorkflow {
        document_id: row
            .try_get("document_id")
            .map_err(|e| PipelineError::DatabaseError(e.to_string()))?,
        status,
        paused: row
            .try_get("paused")
            .map_err(|e| PipelineError::DatabaseError(e.to_string()))?,
        risk_level,
        retry_count: retry_count.max(0) as u32,
        state,
        state_hash: row
            .try_get("state_hash")
            .map_err(|e| PipelineError::DatabaseError(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| PipelineError::DatabaseError(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| PipelineError::DatabaseError(e.to_string()))?,
    })
}

//
// ================= Tests =================
//

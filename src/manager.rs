//! Workflow management façade
//!
//! Submission, human-review resumption and read-only projections over
//! the workflow state store.

use crate::config::PipelineConfig;
use crate::engine::WorkflowEngine;
use crate::error::PipelineError;
use crate::models::{DocumentType, HumanFeedback, NodeError, RiskLevel, WorkflowStatus};
use crate::state::{NodeId, WorkflowState};
use crate::store::{StoredWorkflow, WorkflowStateStore};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct WorkflowManager {
    engine: WorkflowEngine,
    store: Arc<dyn WorkflowStateStore>,
    config: PipelineConfig,
}

impl WorkflowManager {
    pub fn new(
        engine: WorkflowEngine,
        store: Arc<dyn WorkflowStateStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    /// Submit a document: allocate an id, drive the engine to a terminal
    /// or quarantined state, persist and return the final snapshot.
    pub async fn submit(
        &self,
        document_path: &str,
        document_type: DocumentType,
    ) -> Result<WorkflowState> {
        let document_id = Uuid::new_v4();
        let start = Instant::now();

        info!(
            document_id = %document_id,
            document_path = %document_path,
            document_type = %document_type,
            "Workflow submission received"
        );

        let initial_state = WorkflowState::new(
            document_id,
            document_path,
            document_type,
            self.config.max_retries,
        );

        let mut final_state = match self.engine.run(initial_state.clone()).await {
            Ok(state) => state,
            Err(e) => {
                error!(document_id = %document_id, error = %e, "Workflow execution failed");
                let mut error_state = initial_state;
                error_state.status = WorkflowStatus::Failed;
                error_state
                    .error_history
                    .push(NodeError::new("workflow_manager", &e));
                error_state
            }
        };

        final_state.processing_time_ms = start.elapsed().as_millis() as u64;
        self.store.save(&final_state).await?;

        info!(
            document_id = %document_id,
            status = %final_state.status,
            processing_time_ms = final_state.processing_time_ms,
            "Workflow submission finished"
        );

        Ok(final_state)
    }

    /// Resume a quarantined workflow with reviewer feedback.
    ///
    /// Approval is a full override: risk is forced low and every anomaly
    /// cleared, and the run re-enters past the checks so they cannot
    /// re-derive what the reviewer dismissed. Corrections merge into the
    /// candidate record and re-enter validation with a fresh retry budget.
    pub async fn resume(
        &self,
        document_id: Uuid,
        feedback: HumanFeedback,
    ) -> Result<WorkflowState> {
        debug!(document_id = %document_id, "Workflow resume started");

        let stored = self
            .store
            .get(document_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(document_id.to_string()))?;

        if stored.status != WorkflowStatus::Quarantined || !stored.state.paused {
            return Err(PipelineError::InvalidState(format!(
                "Workflow {} is not quarantined (status: {})",
                document_id, stored.status
            )));
        }

        let mut state = stored.state;
        state.human_feedback = Some(feedback.clone());
        state.paused = false;
        state.status = WorkflowStatus::Processing;

        let entry = if feedback.approved {
            state.risk_level = Some(RiskLevel::Low);
            state.structural_anomalies.clear();
            state.compliance_anomalies.clear();

            debug!(document_id = %document_id, "Workflow approved by reviewer");
            NodeId::InsertGraph
        } else {
            if let Some(corrections) = &feedback.corrections {
                merge_corrections(&mut state.candidate_record, corrections);
                state.retry_count = 0;

                debug!(document_id = %document_id, "Reviewer corrections applied");
            }
            NodeId::Validate
        };

        let start = Instant::now();
        let mut final_state = match self.engine.run_from(state.clone(), entry).await {
            Ok(resumed) => resumed,
            Err(e) => {
                error!(document_id = %document_id, error = %e, "Workflow resume failed");
                let mut error_state = state;
                error_state.status = WorkflowStatus::Failed;
                error_state
                    .error_history
                    .push(NodeError::new("workflow_resume", &e));
                error_state
            }
        };

        final_state.processing_time_ms = final_state
            .processing_time_ms
            .saturating_add(start.elapsed().as_millis() as u64);
        self.store.save(&final_state).await?;

        info!(
            document_id = %document_id,
            status = %final_state.status,
            "Workflow resume finished"
        );

        Ok(final_state)
    }

    /// Current stored snapshot for a document.
    pub async fn status(&self, document_id: Uuid) -> Result<Option<StoredWorkflow>> {
        self.store.get(document_id).await
    }

    /// All workflows awaiting human review.
    pub async fn list_quarantined(&self) -> Result<Vec<StoredWorkflow>> {
        self.store.list_quarantined().await
    }

    pub async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<StoredWorkflow>> {
        self.store.list_by_status(status).await
    }

    pub async fn list_by_risk(&self, risk: RiskLevel) -> Result<Vec<StoredWorkflow>> {
        self.store.list_by_risk(risk).await
    }
}

/// Shallow-merge reviewer corrections into the candidate record. A
/// missing candidate is replaced wholesale.
fn merge_corrections(candidate: &mut Option<Value>, corrections: &Value) {
    match candidate {
        Some(Value::Object(existing)) => {
            if let Value::Object(corrections) = corrections {
                for (key, value) in corrections {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
        _ => *candidate = Some(corrections.clone()),
    }
}

//
// ================= Tests =================
//

//! Node functions for the document workflow
//!
//! Every node takes the current state plus injected collaborators and
//! returns a `StateUpdate` patch; it catches its own failures into the
//! error history rather than aborting the run.

use super::WorkflowEngine;
use crate::models::{DocumentRecord, FinalReport, RiskLevel, WorkflowStatus};
use crate::state::{NodeId, StateUpdate, WorkflowState};
use crate::validate::extraction_confidence;
use serde_json::Value;
use tracing::{debug, error, warn};

impl WorkflowEngine {
    /// Node 1: extract raw text. Failure here is terminal.
    pub(super) async fn node_extract_text(&self, state: &WorkflowState) -> StateUpdate {
        debug!(document_id = %state.document_id, "Node extract_text started");

        match self.extractor.extract_text(&state.document_path).await {
            Ok(raw_text) => {
                debug!(
                    document_id = %state.document_id,
                    text_length = raw_text.len(),
                    "Node extract_text succeeded"
                );
                StateUpdate {
                    raw_text: Some(raw_text),
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                }
            }
            Err(e) => {
                error!(document_id = %state.document_id, error = %e, "Node extract_text failed");
                let mut update = StateUpdate::node_failure(NodeId::ExtractText, e);
                update.status = Some(WorkflowStatus::Failed);
                update
            }
        }
    }

    /// Node 2: structure raw text into a candidate record, injecting the
    /// critic's feedback on retry attempts.
    pub(super) async fn node_structure_record(&self, state: &WorkflowState) -> StateUpdate {
        debug!(
            document_id = %state.document_id,
            retry_count = state.retry_count,
            "Node structure_record started"
        );

        let Some(raw_text) = state.raw_text.as_deref() else {
            return StateUpdate::node_failure(NodeId::StructureRecord, "No raw text available");
        };

        match self
            .structurer
            .structure(raw_text, state.critic_feedback.as_deref())
            .await
        {
            Ok(candidate) => {
                let confidence = extraction_confidence(&candidate);
                debug!(
                    document_id = %state.document_id,
                    confidence,
                    "Node structure_record succeeded"
                );
                StateUpdate {
                    candidate_record: Some(candidate),
                    extraction_confidence: Some(confidence),
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                }
            }
            Err(e) => {
                error!(document_id = %state.document_id, error = %e, "Node structure_record failed");
                StateUpdate::node_failure(NodeId::StructureRecord, e)
            }
        }
    }

    /// Node 3: structural validation; scores risk from this run's
    /// anomalies. A candidate that does not parse leaves the risk unset,
    /// which routes to quarantine.
    pub(super) async fn node_validate(&self, state: &WorkflowState) -> StateUpdate {
        debug!(document_id = %state.document_id, "Node validate started");

        let Some(candidate) = state.candidate_record.as_ref() else {
            return StateUpdate::node_failure(NodeId::Validate, "No candidate record to validate");
        };

        match DocumentRecord::from_candidate(candidate) {
            Ok(record) => {
                let anomalies = self.validator.validate(&record);
                let risk_level = self.scorer.score(&anomalies, &[]);

                debug!(
                    document_id = %state.document_id,
                    anomalies_count = anomalies.len(),
                    risk_level = %risk_level,
                    "Node validate succeeded"
                );

                StateUpdate {
                    append_structural: anomalies,
                    risk_level: Some(risk_level),
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                }
            }
            Err(e) => {
                error!(document_id = %state.document_id, error = %e, "Node validate failed");
                StateUpdate::node_failure(NodeId::Validate, e)
            }
        }
    }

    /// Node 4: the critic converts anomalies into correction feedback and
    /// consumes one retry.
    pub(super) async fn node_critic(&self, state: &WorkflowState) -> StateUpdate {
        debug!(
            document_id = %state.document_id,
            anomalies_count = state.structural_anomalies.len(),
            "Node critic started"
        );

        let critique = self.critic.critique(
            state.retry_count,
            &state.structural_anomalies,
            state.candidate_record.as_ref(),
        );

        StateUpdate {
            critic_feedback: Some(critique.feedback),
            retry_count: Some(critique.retry_count),
            status: Some(WorkflowStatus::Processing),
            ..Default::default()
        }
    }

    /// Node 5: audit against the agreement's terms and rescore risk over
    /// both anomaly sources.
    pub(super) async fn node_compliance_audit(&self, state: &WorkflowState) -> StateUpdate {
        debug!(document_id = %state.document_id, "Node compliance_audit started");

        if !self.config.enable_compliance_audit {
            debug!("Compliance audit disabled, skipping");
            return StateUpdate {
                compliance_anomalies: Some(Vec::new()),
                ..Default::default()
            };
        }

        let record = state
            .candidate_record
            .as_ref()
            .ok_or_else(|| {
                crate::error::PipelineError::ComplianceError(
                    "No candidate record to audit".to_string(),
                )
            })
            .and_then(DocumentRecord::from_candidate);

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                error!(document_id = %state.document_id, error = %e, "Node compliance_audit failed");
                let mut update = StateUpdate::node_failure(NodeId::ComplianceAudit, e);
                update.compliance_anomalies = Some(Vec::new());
                return update;
            }
        };

        match self.auditor.audit(&record).await {
            Ok(compliance_anomalies) => {
                let risk_level = self
                    .scorer
                    .score(&state.structural_anomalies, &compliance_anomalies);

                debug!(
                    document_id = %state.document_id,
                    compliance_anomalies_count = compliance_anomalies.len(),
                    risk_level = %risk_level,
                    "Node compliance_audit succeeded"
                );

                StateUpdate {
                    compliance_anomalies: Some(compliance_anomalies),
                    risk_level: Some(risk_level),
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                }
            }
            Err(e) => {
                error!(document_id = %state.document_id, error = %e, "Node compliance_audit failed");
                let mut update = StateUpdate::node_failure(NodeId::ComplianceAudit, e);
                update.compliance_anomalies = Some(Vec::new());
                update
            }
        }
    }

    /// Node 6: suspend for human review.
    pub(super) async fn node_quarantine(&self, state: &WorkflowState) -> StateUpdate {
        warn!(
            document_id = %state.document_id,
            risk_level = ?state.risk_level,
            "Node quarantine started"
        );

        let pause_reason = if state.retry_count >= state.max_retries {
            format!("Max retries ({}) exceeded", state.max_retries)
        } else {
            match state.risk_level {
                Some(risk @ (RiskLevel::High | RiskLevel::Critical)) => {
                    if state.compliance_anomalies.is_empty() {
                        format!("High risk level: {}", risk)
                    } else {
                        format!(
                            "High risk level: {} (includes {} compliance violations)",
                            risk,
                            state.compliance_anomalies.len()
                        )
                    }
                }
                _ => "Manual review required".to_string(),
            }
        };

        warn!(
            document_id = %state.document_id,
            pause_reason = %pause_reason,
            "Node quarantine complete"
        );

        StateUpdate {
            paused: Some(true),
            pause_reason: Some(pause_reason),
            status: Some(WorkflowStatus::Quarantined),
            ..Default::default()
        }
    }

    /// Node 7: upsert the record into the knowledge store. Failure
    /// degrades the run instead of failing it.
    pub(super) async fn node_insert_graph(&self, state: &WorkflowState) -> StateUpdate {
        debug!(document_id = %state.document_id, "Node insert_graph started");

        let record = state
            .candidate_record
            .as_ref()
            .ok_or_else(|| {
                crate::error::PipelineError::GraphError("No candidate record to insert".to_string())
            })
            .and_then(DocumentRecord::from_candidate);

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(document_id = %state.document_id, error = %e, "Node insert_graph failed");
                let mut update = StateUpdate::node_failure(NodeId::InsertGraph, e);
                update.store_written = Some(false);
                return update;
            }
        };

        match self.knowledge_store.upsert(&record).await {
            Ok(record_id) => {
                debug!(
                    document_id = %state.document_id,
                    record_id = %record_id,
                    "Node insert_graph succeeded"
                );
                StateUpdate {
                    store_written: Some(true),
                    record_id: Some(record_id),
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(document_id = %state.document_id, error = %e, "Node insert_graph failed");
                let mut update = StateUpdate::node_failure(NodeId::InsertGraph, e);
                update.store_written = Some(false);
                update
            }
        }
    }

    /// Node 8: best-effort vector indexing. Failures are logged and
    /// swallowed; they never change routing.
    pub(super) async fn node_embed(&self, state: &WorkflowState) -> StateUpdate {
        debug!(document_id = %state.document_id, "Node embed started");

        if !self.config.enable_vector_embedding {
            debug!("Vector embedding disabled, skipping");
            return StateUpdate::default();
        }

        let Some(candidate) = state.candidate_record.as_ref() else {
            return StateUpdate::default();
        };

        let text = searchable_text(candidate);
        let id = state
            .record_id
            .clone()
            .unwrap_or_else(|| state.document_id.to_string());
        let metadata = serde_json::json!({
            "document_number": candidate.get("document_number"),
            "date": candidate.get("date"),
            "amount": candidate.get("total_amount"),
            "vendor_name": candidate.get("vendor_name"),
        });

        match self.vector_index.index(&id, &text, metadata).await {
            Ok(()) => {
                debug!(document_id = %state.document_id, "Node embed succeeded");
                StateUpdate {
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(document_id = %state.document_id, error = %e, "Node embed failed");
                StateUpdate::default()
            }
        }
    }

    /// Node 9: final report, workflow complete.
    pub(super) async fn node_finalize(&self, state: &WorkflowState) -> StateUpdate {
        debug!(document_id = %state.document_id, "Node finalize started");

        let report = FinalReport {
            document_id: state.document_id,
            record_number: candidate_document_number(state),
            record_id: state.record_id.clone(),
            extraction_confidence: state.extraction_confidence,
            risk_level: state.risk_level,
            structural_anomaly_count: state.structural_anomalies.len(),
            compliance_anomaly_count: state.compliance_anomalies.len(),
            retry_count: state.retry_count,
            store_written: state.store_written,
            errors: Vec::new(),
            last_successful_node: None,
        };

        StateUpdate {
            final_report: Some(report),
            status: Some(WorkflowStatus::Completed),
            ..Default::default()
        }
    }

    /// Node 10: terminal failure report.
    pub(super) async fn node_error_handler(&self, state: &WorkflowState) -> StateUpdate {
        error!(
            document_id = %state.document_id,
            errors_count = state.error_history.len(),
            "Node error_handler started"
        );

        let report = FinalReport {
            document_id: state.document_id,
            record_number: candidate_document_number(state),
            record_id: state.record_id.clone(),
            extraction_confidence: state.extraction_confidence,
            risk_level: state.risk_level,
            structural_anomaly_count: state.structural_anomalies.len(),
            compliance_anomaly_count: state.compliance_anomalies.len(),
            retry_count: state.retry_count,
            store_written: state.store_written,
            errors: state.error_history.clone(),
            last_successful_node: Some(last_successful_node(state).to_string()),
        };

        StateUpdate {
            final_report: Some(report),
            status: Some(WorkflowStatus::Failed),
            ..Default::default()
        }
    }
}

fn candidate_document_number(state: &WorkflowState) -> Option<String> {
    state
        .candidate_record
        .as_ref()
        .and_then(|c| c.get("document_number"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn last_successful_node(state: &WorkflowState) -> &'static str {
    if state.store_written {
        "insert_graph"
    } else if !state.compliance_anomalies.is_empty() {
        "compliance_audit"
    } else if state.risk_level.is_some() {
        "validate"
    } else if state.candidate_record.is_some() {
        "structure_record"
    } else if state.raw_text.is_some() {
        "extract_text"
    } else {
        "none"
    }
}

/// Searchable rendering of a candidate for the vector index.
fn searchable_text(candidate: &Value) -> String {
    let field = |name: &str| {
        candidate
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string()
    };

    let mut text = format!(
        "Document: {}\nDate: {}\nVendor: {}\nAmount: ${}\n\nLine Items:",
        field("document_number"),
        field("date"),
        field("vendor_name"),
        candidate
            .get("total_amount")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .unwrap_or_else(|| "0".to_string()),
    );

    if let Some(items) = candidate.get("line_items").and_then(Value::as_array) {
        for item in items {
            let get = |name: &str| {
                item.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_string()
            };
            text.push_str(&format!(
                "\n- {}: {} (${})",
                get("cost_code"),
                get("description"),
                item.get("total")
                    .map(|v| v.to_string().trim_matches('"').to_string())
                    .unwrap_or_else(|| "?".to_string()),
            ));
        }
    }

    text
}

//! Workflow state threaded through the pipeline
//!
//! Node functions never mutate state directly; they return a `StateUpdate`
//! patch which the engine merges. Append-only fields (anomalies, error
//! history) are extended, everything else is replace-if-set.

use crate::models::{
    ComplianceAnomaly, DocumentType, FinalReport, HumanFeedback, NodeError, RiskLevel,
    StructuralAnomaly, WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifiers for the workflow's nodes. Closed set; routing is an
/// exhaustive match over these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    ExtractText,
    StructureRecord,
    Validate,
    ComplianceAudit,
    Critic,
    Quarantine,
    InsertGraph,
    Embed,
    Finalize,
    ErrorHandler,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::ExtractText => "extract_text",
            NodeId::StructureRecord => "structure_record",
            NodeId::Validate => "validate",
            NodeId::ComplianceAudit => "compliance_audit",
            NodeId::Critic => "critic",
            NodeId::Quarantine => "quarantine",
            NodeId::InsertGraph => "insert_graph",
            NodeId::Embed => "embed",
            NodeId::Finalize => "finalize",
            NodeId::ErrorHandler => "error_handler",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The mutable record for one document's run through the pipeline.
///
/// Invariants: `paused` implies `status == Quarantined`; `retry_count`
/// never exceeds `max_retries` on any path past the critic node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub document_id: Uuid,
    pub document_path: String,
    pub document_type: DocumentType,

    // Processing data
    pub raw_text: Option<String>,
    pub candidate_record: Option<Value>,
    pub extraction_confidence: Option<f64>,

    // Validation & audit
    pub structural_anomalies: Vec<StructuralAnomaly>,
    pub compliance_anomalies: Vec<ComplianceAnomaly>,
    pub risk_level: Option<RiskLevel>,

    // Retry loop
    pub critic_feedback: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,

    // Review
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub human_feedback: Option<HumanFeedback>,

    // External writes
    pub store_written: bool,
    pub record_id: Option<String>,

    // Bookkeeping
    pub status: WorkflowStatus,
    pub error_history: Vec<NodeError>,
    pub current_node: Option<NodeId>,
    pub processing_time_ms: u64,
    pub final_report: Option<FinalReport>,
}

impl WorkflowState {
    pub fn new(
        document_id: Uuid,
        document_path: impl Into<String>,
        document_type: DocumentType,
        max_retries: u32,
    ) -> Self {
        Self {
            document_id,
            document_path: document_path.into(),
            document_type,
            raw_text: None,
            candidate_record: None,
            extraction_confidence: None,
            structural_anomalies: Vec::new(),
            compliance_anomalies: Vec::new(),
            risk_level: None,
            critic_feedback: None,
            retry_count: 0,
            max_retries,
            paused: false,
            pause_reason: None,
            human_feedback: None,
            store_written: false,
            record_id: None,
            status: WorkflowStatus::Processing,
            error_history: Vec::new(),
            current_node: None,
            processing_time_ms: 0,
            final_report: None,
        }
    }

    /// Merge a node's patch into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        self.structural_anomalies.extend(update.append_structural);
        self.error_history.extend(update.append_errors);

        if let Some(raw_text) = update.raw_text {
            self.raw_text = Some(raw_text);
        }
        if let Some(candidate) = update.candidate_record {
            self.candidate_record = Some(candidate);
        }
        if let Some(confidence) = update.extraction_confidence {
            self.extraction_confidence = Some(confidence);
        }
        if let Some(compliance) = update.compliance_anomalies {
            self.compliance_anomalies = compliance;
        }
        if let Some(risk) = update.risk_level {
            self.risk_level = Some(risk);
        }
        if let Some(feedback) = update.critic_feedback {
            self.critic_feedback = Some(feedback);
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(paused) = update.paused {
            self.paused = paused;
        }
        if let Some(reason) = update.pause_reason {
            self.pause_reason = Some(reason);
        }
        if let Some(written) = update.store_written {
            self.store_written = written;
        }
        if let Some(record_id) = update.record_id {
            self.record_id = Some(record_id);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(report) = update.final_report {
            self.final_report = Some(report);
        }
    }
}

/// Patch returned by a node function. Vec fields append; `Option` fields
/// replace when set.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub raw_text: Option<String>,
    pub candidate_record: Option<Value>,
    pub extraction_confidence: Option<f64>,
    pub append_structural: Vec<StructuralAnomaly>,
    pub compliance_anomalies: Option<Vec<ComplianceAnomaly>>,
    pub risk_level: Option<RiskLevel>,
    pub critic_feedback: Option<String>,
    pub retry_count: Option<u32>,
    pub paused: Option<bool>,
    pub pause_reason: Option<String>,
    pub store_written: Option<bool>,
    pub record_id: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub append_errors: Vec<NodeError>,
    pub final_report: Option<FinalReport>,
}

impl StateUpdate {
    /// Patch recording a caught node failure.
    pub fn node_failure(node: NodeId, error: impl std::fmt::Display) -> Self {
        Self {
            append_errors: vec![NodeError::new(node.as_str(), error)],
            ..Default::default()
        }
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, StructuralAnomalyKind};

    fn anomaly(message: &str) -> StructuralAnomaly {
        StructuralAnomaly {
            kind: StructuralAnomalyKind::MathError,
            severity: Severity::High,
            message: message.to_string(),
            field: None,
            line_item_id: None,
            expected: None,
            actual: None,
        }
    }

    fn new_state() -> WorkflowState {
        WorkflowState::new(Uuid::new_v4(), "/tmp/doc.txt", DocumentType::Invoice, 3)
    }

    #[test]
    fn test_append_only_fields_accumulate() {
        let mut state = new_state();

        state.apply(StateUpdate {
            append_structural: vec![anomaly("first")],
            ..Default::default()
        });
        state.apply(StateUpdate {
            append_structural: vec![anomaly("second")],
            append_errors: vec![NodeError::new("validate", "boom")],
            ..Default::default()
        });

        assert_eq!(state.structural_anomalies.len(), 2);
        assert_eq!(state.error_history.len(), 1);
    }

    #[test]
    fn test_replace_fields_overwrite() {
        let mut state = new_state();

        state.apply(StateUpdate {
            risk_level: Some(RiskLevel::Medium),
            retry_count: Some(1),
            ..Default::default()
        });
        state.apply(StateUpdate {
            risk_level: Some(RiskLevel::Low),
            compliance_anomalies: Some(Vec::new()),
            ..Default::default()
        });

        assert_eq!(state.risk_level, Some(RiskLevel::Low));
        assert_eq!(state.retry_count, 1);
        assert!(state.compliance_anomalies.is_empty());
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut state = new_state();
        let before = serde_json::to_value(&state).unwrap();
        state.apply(StateUpdate::default());
        let after = serde_json::to_value(&state).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut state = new_state();
        state.status = WorkflowStatus::Quarantined;
        state.paused = true;
        state.risk_level = Some(RiskLevel::High);
        state.retry_count = 2;
        state.current_node = Some(NodeId::Quarantine);

        let json = serde_json::to_string(&state).unwrap();
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.status, WorkflowStatus::Quarantined);
        assert!(restored.paused);
        assert_eq!(restored.risk_level, Some(RiskLevel::High));
        assert_eq!(restored.retry_count, 2);
        assert_eq!(restored.current_node, Some(NodeId::Quarantine));
    }
}

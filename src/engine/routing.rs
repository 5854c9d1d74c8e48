//! Conditional routing decisions between workflow nodes
//!
//! Each decision point has its own closed outcome enum; the engine maps
//! outcomes to next nodes in one exhaustive transition table.

use crate::config::PipelineConfig;
use crate::critic::RetryController;
use crate::models::{RiskLevel, Severity, WorkflowStatus};
use crate::state::WorkflowState;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRoute {
    Continue,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureRoute {
    Validate,
    Retry,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRoute {
    Clean,
    Correctable,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceRoute {
    Clean,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphRoute {
    Embed,
    Finalize,
}

/// Extraction failure is always fatal: a document that cannot be read is
/// corrupt or unsupported, not correctable.
pub fn after_extraction(state: &WorkflowState) -> ExtractionRoute {
    if state.status == WorkflowStatus::Failed {
        debug!(document_id = %state.document_id, route = "error", "Routing: extraction failed");
        return ExtractionRoute::Error;
    }

    debug!(document_id = %state.document_id, route = "continue", "Routing: extraction succeeded");
    ExtractionRoute::Continue
}

/// A candidate with identifying fields moves on to validation; otherwise
/// retry through the critic while budget remains.
pub fn after_structuring(state: &WorkflowState, critic: &RetryController) -> StructureRoute {
    if state
        .candidate_record
        .as_ref()
        .map(has_identifying_fields)
        .unwrap_or(false)
    {
        debug!(document_id = %state.document_id, route = "validate", "Routing: candidate usable");
        return StructureRoute::Validate;
    }

    if critic.can_retry(state.retry_count) {
        debug!(
            document_id = %state.document_id,
            retry_count = state.retry_count,
            route = "retry",
            "Routing: structuring retry"
        );
        return StructureRoute::Retry;
    }

    warn!(
        document_id = %state.document_id,
        retry_count = state.retry_count,
        route = "quarantine",
        "Routing: structuring retries exhausted"
    );
    StructureRoute::Quarantine
}

fn has_identifying_fields(candidate: &Value) -> bool {
    candidate
        .get("document_number")
        .and_then(Value::as_str)
        .map(|number| !number.trim().is_empty())
        .unwrap_or(false)
}

/// Low risk proceeds; medium risk retries through the critic while budget
/// remains; anything else (high, critical, or never scored) quarantines.
pub fn after_validation(state: &WorkflowState, critic: &RetryController) -> ValidationRoute {
    match state.risk_level {
        Some(RiskLevel::Low) => {
            debug!(document_id = %state.document_id, route = "clean", "Routing: validation clean");
            ValidationRoute::Clean
        }
        Some(RiskLevel::Medium) if critic.can_retry(state.retry_count) => {
            debug!(
                document_id = %state.document_id,
                retry_count = state.retry_count,
                route = "correctable",
                "Routing: validation correctable"
            );
            ValidationRoute::Correctable
        }
        risk => {
            warn!(
                document_id = %state.document_id,
                risk_level = ?risk,
                retry_count = state.retry_count,
                route = "quarantine",
                "Routing: validation quarantine"
            );
            ValidationRoute::Quarantine
        }
    }
}

/// Compliance anomalies quarantine once their severity counts reach the
/// configured thresholds; below them the run proceeds with warnings.
pub fn after_compliance(state: &WorkflowState, config: &PipelineConfig) -> ComplianceRoute {
    if !config.enable_compliance_audit {
        return ComplianceRoute::Clean;
    }

    if state.compliance_anomalies.is_empty() {
        debug!(document_id = %state.document_id, route = "clean", "Routing: compliance clean");
        return ComplianceRoute::Clean;
    }

    let critical_count = state
        .compliance_anomalies
        .iter()
        .filter(|a| a.severity == Severity::Critical)
        .count();
    let high_count = state
        .compliance_anomalies
        .iter()
        .filter(|a| a.severity == Severity::High)
        .count();

    if critical_count >= config.risk_thresholds.critical_threshold {
        warn!(
            document_id = %state.document_id,
            critical_count,
            route = "quarantine",
            "Routing: critical compliance violations"
        );
        return ComplianceRoute::Quarantine;
    }

    if high_count >= config.risk_thresholds.high_threshold {
        warn!(
            document_id = %state.document_id,
            high_count,
            route = "quarantine",
            "Routing: high-severity compliance violations"
        );
        return ComplianceRoute::Quarantine;
    }

    debug!(
        document_id = %state.document_id,
        anomalies_count = state.compliance_anomalies.len(),
        route = "clean",
        "Routing: compliance clean with warnings"
    );
    ComplianceRoute::Clean
}

/// Graph failure degrades gracefully: skip embedding, still finalize.
pub fn after_graph_insert(state: &WorkflowState) -> GraphRoute {
    if state.store_written {
        debug!(document_id = %state.document_id, route = "embed", "Routing: graph upsert succeeded");
        return GraphRoute::Embed;
    }

    warn!(document_id = %state.document_id, route = "finalize", "Routing: graph upsert failed");
    GraphRoute::Finalize
}

//
// ================= Tests =================
//

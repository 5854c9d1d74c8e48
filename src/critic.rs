//! Retry controller (critic)
//!
//! Turns structural anomalies into corrective feedback for the next
//! structuring attempt and owns the retry budget: the router's gate and
//! the increment live on the same type so the budget cannot drift.

use crate::models::{StructuralAnomaly, StructuralAnomalyKind};
use crate::validate::PLACEHOLDER_COST_CODE;
use serde_json::Value;
use tracing::debug;

/// Output of one critic pass: the feedback to inject into the next
/// structuring attempt, and the incremented retry count.
#[derive(Debug, Clone)]
pub struct Critique {
    pub feedback: String,
    pub retry_count: u32,
}

pub struct RetryController {
    max_retries: u32,
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Router gate: is there budget left for another attempt?
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Build correction guidance and consume one retry. Never fails:
    /// with no anomalies it returns a benign re-extract instruction.
    pub fn critique(
        &self,
        retry_count: u32,
        anomalies: &[StructuralAnomaly],
        candidate: Option<&Value>,
    ) -> Critique {
        let feedback = build_feedback(anomalies, candidate);
        let new_count = retry_count.saturating_add(1);

        debug!(
            retry_count = new_count,
            max_retries = self.max_retries,
            anomalies = anomalies.len(),
            "Critic produced correction feedback"
        );

        Critique {
            feedback,
            retry_count: new_count,
        }
    }
}

fn build_feedback(anomalies: &[StructuralAnomaly], candidate: Option<&Value>) -> String {
    let mut lines: Vec<String> = Vec::new();

    if anomalies
        .iter()
        .any(|a| a.kind == StructuralAnomalyKind::MathError)
    {
        lines.push(
            "Recompute every line item total: each total must equal quantity x unit_price."
                .to_string(),
        );
    }
    if anomalies
        .iter()
        .any(|a| a.kind == StructuralAnomalyKind::TotalMismatch)
    {
        lines.push(
            "Recompute the document total as the exact sum of the line item totals.".to_string(),
        );
    }

    let missing: Vec<&str> = anomalies
        .iter()
        .filter(|a| a.kind == StructuralAnomalyKind::MissingField)
        .filter_map(|a| a.field.as_deref())
        .collect();
    if !missing.is_empty() {
        lines.push(format!(
            "Fill in the missing fields from the document text: {}.",
            missing.join(", ")
        ));
    }
    if anomalies
        .iter()
        .any(|a| a.kind == StructuralAnomalyKind::MissingLineItems)
    {
        lines.push("Extract every billed line item from the document body.".to_string());
    }

    if anomalies.iter().any(|a| {
        matches!(
            a.kind,
            StructuralAnomalyKind::FutureDate | StructuralAnomalyKind::InvalidDueDate
        )
    }) {
        lines.push(
            "Check the dates: the document date must not be in the future and the due date must not precede it."
                .to_string(),
        );
    }
    if anomalies
        .iter()
        .any(|a| a.kind == StructuralAnomalyKind::InvalidDocumentNumber)
    {
        lines.push(
            "Copy the document number exactly as printed (uppercase letters, digits, hyphens)."
                .to_string(),
        );
    }

    if has_placeholder_codes(candidate) {
        lines.push(format!(
            "Replace the placeholder cost code {} with the code printed on each line item.",
            PLACEHOLDER_COST_CODE
        ));
    }

    if lines.is_empty() {
        return "No blocking issues were detected. Re-read the document and extract every field exactly as printed.".to_string();
    }

    let mut feedback = String::from("Fix the following issues in the extracted record:\n");
    for line in lines {
        feedback.push_str("- ");
        feedback.push_str(&line);
        feedback.push('\n');
    }
    feedback
}

fn has_placeholder_codes(candidate: Option<&Value>) -> bool {
    candidate
        .and_then(|c| c.get("line_items"))
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().any(|item| {
                item.get("cost_code").and_then(Value::as_str) == Some(PLACEHOLDER_COST_CODE)
            })
        })
        .unwrap_or(false)
}

//
// ================= Tests =================
//

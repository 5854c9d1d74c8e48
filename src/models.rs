//! Core data models for the document pipeline

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Processing,
    Quarantined,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Contract,
    Budget,
}

//
// ================= Structured Record =================
//

/// A single billed line on a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub cost_code: String,
}

impl LineItem {
    /// quantity × unit_price must equal total, within a cent of rounding.
    pub fn is_math_correct(&self) -> bool {
        let expected = self.quantity * self.unit_price;
        (expected - self.total).abs() <= Decimal::new(1, 2)
    }
}

/// Validated record schema for an ingested document.
///
/// Parsed from the structurer's candidate JSON once identifying fields
/// exist; monetary fields are exact decimals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub document_number: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default = "unknown_vendor")]
    pub vendor_name: String,
    #[serde(default)]
    pub agreement_id: Option<String>,
    pub total_amount: Decimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

fn unknown_vendor() -> String {
    "Unknown".to_string()
}

impl DocumentRecord {
    /// Parse the structurer's candidate JSON into a typed record.
    pub fn from_candidate(candidate: &Value) -> crate::Result<Self> {
        serde_json::from_value(candidate.clone()).map_err(|e| {
            crate::error::PipelineError::ValidationError(format!(
                "Candidate record does not fit the schema: {}",
                e
            ))
        })
    }

    /// Sum of line item totals.
    pub fn line_items_total(&self) -> Decimal {
        self.line_items.iter().map(|item| item.total).sum()
    }
}

//
// ================= Agreement Terms =================
//

/// Read-only projection of an agreement's commercial terms, fetched fresh
/// for each audit run and used only for comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementTerms {
    pub retention_rate: Decimal,
    #[serde(default)]
    pub unit_price_schedule: HashMap<String, Decimal>,
    #[serde(default)]
    pub billing_cap: Option<Decimal>,
    #[serde(default)]
    pub approved_cost_codes: Vec<String>,
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,
}

fn default_price_tolerance() -> Decimal {
    Decimal::new(5, 2) // 5%
}

impl Default for AgreementTerms {
    fn default() -> Self {
        Self {
            retention_rate: Decimal::new(10, 2),
            unit_price_schedule: HashMap::new(),
            billing_cap: None,
            approved_cost_codes: Vec::new(),
            price_tolerance: default_price_tolerance(),
        }
    }
}

//
// ================= Anomalies =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StructuralAnomalyKind {
    MissingField,
    MissingLineItems,
    FutureDate,
    InvalidDueDate,
    InvalidDocumentNumber,
    MathError,
    TotalMismatch,
}

/// A defect detected in the structured record itself (fields, dates,
/// arithmetic), independent of any agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralAnomaly {
    pub kind: StructuralAnomalyKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub line_item_id: Option<String>,
    #[serde(default)]
    pub expected: Option<Value>,
    #[serde(default)]
    pub actual: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceAnomalyKind {
    MissingContract,
    ContractNotFound,
    RetentionViolation,
    PriceMismatch,
    BillingCapExceeded,
    ScopeViolation,
}

/// A deviation between a billed record and its governing agreement's
/// terms. Created once per violation per audit run, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAnomaly {
    pub kind: ComplianceAnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub agreement_id: String,
    #[serde(default)]
    pub clause: Option<String>,
    #[serde(default)]
    pub expected: Option<Value>,
    #[serde(default)]
    pub actual: Option<Value>,
    #[serde(default)]
    pub line_item_id: Option<String>,
    #[serde(default)]
    pub cost_code: Option<String>,
    pub detected_at: DateTime<Utc>,
}

//
// ================= Workflow Bookkeeping =================
//

/// One caught node failure, appended to the state's error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeError {
    pub node: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl NodeError {
    pub fn new(node: &str, error: impl fmt::Display) -> Self {
        Self {
            node: node.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Reviewer input applied to a quarantined workflow on resume.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HumanFeedback {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub corrections: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Terminal summary produced by the finalize and error-handler nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub document_id: Uuid,
    pub record_number: Option<String>,
    pub record_id: Option<String>,
    pub extraction_confidence: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub structural_anomaly_count: usize,
    pub compliance_anomaly_count: usize,
    pub retry_count: u32,
    pub store_written: bool,
    #[serde(default)]
    pub errors: Vec<NodeError>,
    #[serde(default)]
    pub last_successful_node: Option<String>,
}

//
// ================= RiskLevel Ordering =================
//

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl RiskLevel {
    fn rank(&self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Quarantined => "quarantined",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "processing" => Some(WorkflowStatus::Processing),
            "quarantined" => Some(WorkflowStatus::Quarantined),
            "completed" => Some(WorkflowStatus::Completed),
            "failed" => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Contract => "contract",
            DocumentType::Budget => "budget",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i64, unit_price: Decimal, total: Decimal) -> LineItem {
        LineItem {
            id: Some("li-1".to_string()),
            description: "Concrete pour".to_string(),
            quantity: Decimal::from(quantity),
            unit_price,
            total,
            cost_code: "03-100".to_string(),
        }
    }

    #[test]
    fn test_line_item_math() {
        let good = line(4, Decimal::new(2550, 2), Decimal::new(10200, 2));
        assert!(good.is_math_correct());

        let bad = line(4, Decimal::new(2550, 2), Decimal::new(11000, 2));
        assert!(!bad.is_math_correct());
    }

    #[test]
    fn test_line_item_math_rounding_tolerance() {
        // One cent off is still accepted as rounding.
        let near = line(3, Decimal::new(3333, 2), Decimal::new(10000, 2));
        assert!(near.is_math_correct());
    }

    #[test]
    fn test_record_from_candidate_defaults() {
        let candidate = serde_json::json!({
            "document_number": "INV-2041",
            "date": "2026-03-14",
            "total_amount": "1200.00",
            "line_items": [{
                "description": "Site survey",
                "quantity": "1",
                "unit_price": "1200.00",
                "total": "1200.00",
                "cost_code": "01-310"
            }]
        });

        let record = DocumentRecord::from_candidate(&candidate).unwrap();
        assert_eq!(record.vendor_name, "Unknown");
        assert!(record.agreement_id.is_none());
        assert_eq!(record.line_items_total(), Decimal::new(120000, 2));
    }

    #[test]
    fn test_record_from_candidate_rejects_missing_number() {
        let candidate = serde_json::json!({
            "date": "2026-03-14",
            "total_amount": "1200.00"
        });
        assert!(DocumentRecord::from_candidate(&candidate).is_err());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::parse("CRITICAL"), Some(RiskLevel::Critical));
        assert_eq!(WorkflowStatus::parse("quarantined"), Some(WorkflowStatus::Quarantined));
    }
}

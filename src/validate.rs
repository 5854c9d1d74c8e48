//! Structural validation of extracted records
//!
//! Rules-based checks on the record itself (fields, dates, arithmetic),
//! before any agreement comparison. Deterministic enforcement.

use crate::models::{DocumentRecord, Severity, StructuralAnomaly, StructuralAnomalyKind};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::info;

/// Cost code the structurer emits when it cannot classify a line item.
pub const PLACEHOLDER_COST_CODE: &str = "99-999";

/// Trait for a single structural validation rule
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly>;
}

/// Validator that runs every registered rule and collects anomalies
pub struct RecordValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl RecordValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly> {
        let mut anomalies = Vec::new();

        for rule in &self.rules {
            anomalies.extend(rule.check(record));
        }

        info!(
            document_number = %record.document_number,
            anomalies_found = anomalies.len(),
            severity_high = anomalies
                .iter()
                .filter(|a| a.severity == Severity::High)
                .count(),
            "Record validation complete"
        );

        anomalies
    }
}

impl Default for RecordValidator {
    fn default() -> Self {
        create_default_validator()
    }
}

fn anomaly(kind: StructuralAnomalyKind, severity: Severity, message: String) -> StructuralAnomaly {
    StructuralAnomaly {
        kind,
        severity,
        message,
        field: None,
        line_item_id: None,
        expected: None,
        actual: None,
    }
}

//
// ================= Rules =================
//

/// Rule: identifying fields present and non-empty, at least one line item
pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "required_fields"
    }

    fn check(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly> {
        let mut anomalies = Vec::new();

        let mut missing = |field: &str| {
            let mut a = anomaly(
                StructuralAnomalyKind::MissingField,
                Severity::High,
                format!("Required field '{}' is missing or empty", field),
            );
            a.field = Some(field.to_string());
            anomalies.push(a);
        };

        if record.document_number.trim().is_empty() {
            missing("document_number");
        }
        if record.vendor_name.trim().is_empty() {
            missing("vendor_name");
        }
        if record.total_amount == Decimal::ZERO {
            missing("total_amount");
        }

        if record.line_items.is_empty() {
            anomalies.push(anomaly(
                StructuralAnomalyKind::MissingLineItems,
                Severity::High,
                "Document has no line items".to_string(),
            ));
        }

        anomalies
    }
}

/// Rule: document dates must be logical
pub struct DateLogicRule;

impl ValidationRule for DateLogicRule {
    fn name(&self) -> &'static str {
        "date_logic"
    }

    fn check(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly> {
        let mut anomalies = Vec::new();
        let today = chrono::Utc::now().date_naive();

        if record.date > today {
            let mut a = anomaly(
                StructuralAnomalyKind::FutureDate,
                Severity::Medium,
                "Document date is in the future".to_string(),
            );
            a.field = Some("date".to_string());
            a.expected = Some(Value::String("<= today".to_string()));
            a.actual = Some(Value::String(record.date.to_string()));
            anomalies.push(a);
        }

        if let Some(due_date) = record.due_date {
            if due_date < record.date {
                let mut a = anomaly(
                    StructuralAnomalyKind::InvalidDueDate,
                    Severity::Medium,
                    "Due date is before document date".to_string(),
                );
                a.field = Some("due_date".to_string());
                a.expected = Some(Value::String(format!("> {}", record.date)));
                a.actual = Some(Value::String(due_date.to_string()));
                anomalies.push(a);
            }
        }

        anomalies
    }
}

/// Rule: document number uses uppercase alphanumerics and hyphens
pub struct DocumentNumberFormatRule;

impl ValidationRule for DocumentNumberFormatRule {
    fn name(&self) -> &'static str {
        "document_number_format"
    }

    fn check(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly> {
        let number = record.document_number.trim();
        let valid = !number.is_empty()
            && number
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');

        if valid {
            return Vec::new();
        }

        let mut a = anomaly(
            StructuralAnomalyKind::InvalidDocumentNumber,
            Severity::Low,
            "Document number contains invalid characters".to_string(),
        );
        a.field = Some("document_number".to_string());
        a.actual = Some(Value::String(record.document_number.clone()));
        vec![a]
    }
}

/// Rule: quantity × unit_price must equal each line total
pub struct LineItemMathRule;

impl ValidationRule for LineItemMathRule {
    fn name(&self) -> &'static str {
        "line_item_math"
    }

    fn check(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly> {
        let mut anomalies = Vec::new();

        for item in &record.line_items {
            if item.is_math_correct() {
                continue;
            }

            let expected = item.quantity * item.unit_price;
            let mut a = anomaly(
                StructuralAnomalyKind::MathError,
                Severity::High,
                format!(
                    "Line item total incorrect: {} x {} != {}",
                    item.quantity, item.unit_price, item.total
                ),
            );
            a.line_item_id = item.id.clone();
            a.expected = Some(Value::String(expected.to_string()));
            a.actual = Some(Value::String(item.total.to_string()));
            anomalies.push(a);
        }

        anomalies
    }
}

/// Rule: document total equals the sum of line totals
pub struct TotalConsistencyRule;

impl ValidationRule for TotalConsistencyRule {
    fn name(&self) -> &'static str {
        "total_consistency"
    }

    fn check(&self, record: &DocumentRecord) -> Vec<StructuralAnomaly> {
        if record.line_items.is_empty() {
            return Vec::new();
        }

        let line_items_sum = record.line_items_total();
        if (record.total_amount - line_items_sum).abs() <= Decimal::new(1, 2) {
            return Vec::new();
        }

        let mut a = anomaly(
            StructuralAnomalyKind::TotalMismatch,
            Severity::High,
            "Document total does not match sum of line items".to_string(),
        );
        a.field = Some("total_amount".to_string());
        a.expected = Some(Value::String(line_items_sum.to_string()));
        a.actual = Some(Value::String(record.total_amount.to_string()));
        vec![a]
    }
}

/// Create a validator with the standard rule set
pub fn create_default_validator() -> RecordValidator {
    let mut validator = RecordValidator::new();
    validator.add_rule(Box::new(RequiredFieldsRule));
    validator.add_rule(Box::new(DateLogicRule));
    validator.add_rule(Box::new(DocumentNumberFormatRule));
    validator.add_rule(Box::new(LineItemMathRule));
    validator.add_rule(Box::new(TotalConsistencyRule));
    validator
}

//
// ================= Extraction Confidence =================
//

/// Confidence score from candidate completeness: fraction of identifying
/// fields present, averaged with the fraction of line items carrying a
/// real cost code.
pub fn extraction_confidence(candidate: &Value) -> f64 {
    const REQUIRED_FIELDS: [&str; 5] = [
        "document_number",
        "date",
        "vendor_name",
        "total_amount",
        "line_items",
    ];

    let present = REQUIRED_FIELDS
        .iter()
        .filter(|field| field_present(candidate, field))
        .count();
    let mut confidence = present as f64 / REQUIRED_FIELDS.len() as f64;

    if let Some(items) = candidate.get("line_items").and_then(Value::as_array) {
        if !items.is_empty() {
            let with_codes = items
                .iter()
                .filter(|item| {
                    item.get("cost_code")
                        .and_then(Value::as_str)
                        .map(|code| !code.is_empty() && code != PLACEHOLDER_COST_CODE)
                        .unwrap_or(false)
                })
                .count();
            let code_ratio = with_codes as f64 / items.len() as f64;
            confidence = (confidence + code_ratio) / 2.0;
        }
    }

    (confidence * 100.0).round() / 100.0
}

fn field_present(candidate: &Value, field: &str) -> bool {
    match candidate.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;
    use chrono::NaiveDate;

    fn clean_record() -> DocumentRecord {
        DocumentRecord {
            document_number: "INV-1001".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
            due_date: Some(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()),
            vendor_name: "Acme Builders".to_string(),
            agreement_id: Some("AGR-77".to_string()),
            total_amount: Decimal::new(150000, 2),
            line_items: vec![LineItem {
                id: Some("li-1".to_string()),
                description: "Framing labor".to_string(),
                quantity: Decimal::from(10),
                unit_price: Decimal::new(15000, 2),
                total: Decimal::new(150000, 2),
                cost_code: "06-110".to_string(),
            }],
        }
    }

    #[test]
    fn test_clean_record_has_no_anomalies() {
        let validator = create_default_validator();
        assert!(validator.validate(&clean_record()).is_empty());
    }

    #[test]
    fn test_math_error_flagged_high() {
        let mut record = clean_record();
        record.line_items[0].total = Decimal::new(175000, 2);
        record.total_amount = Decimal::new(175000, 2);

        let anomalies = create_default_validator().validate(&record);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, StructuralAnomalyKind::MathError);
        assert_eq!(anomalies[0].severity, Severity::High);
    }

    #[test]
    fn test_total_mismatch_flagged() {
        let mut record = clean_record();
        record.total_amount = Decimal::new(999900, 2);

        let anomalies = create_default_validator().validate(&record);
        assert!(anomalies
            .iter()
            .any(|a| a.kind == StructuralAnomalyKind::TotalMismatch));
    }

    #[test]
    fn test_missing_line_items_flagged() {
        let mut record = clean_record();
        record.line_items.clear();

        let anomalies = create_default_validator().validate(&record);
        assert!(anomalies
            .iter()
            .any(|a| a.kind == StructuralAnomalyKind::MissingLineItems));
    }

    #[test]
    fn test_due_date_before_date_flagged_medium() {
        let mut record = clean_record();
        record.due_date = Some(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());

        let anomalies = create_default_validator().validate(&record);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, StructuralAnomalyKind::InvalidDueDate);
        assert_eq!(anomalies[0].severity, Severity::Medium);
    }

    #[test]
    fn test_lowercase_document_number_flagged_low() {
        let mut record = clean_record();
        record.document_number = "inv_1001".to_string();

        let anomalies = create_default_validator().validate(&record);
        assert!(anomalies.iter().any(|a| {
            a.kind == StructuralAnomalyKind::InvalidDocumentNumber && a.severity == Severity::Low
        }));
    }

    #[test]
    fn test_confidence_full_candidate() {
        let candidate = serde_json::json!({
            "document_number": "INV-1001",
            "date": "2026-02-10",
            "vendor_name": "Acme Builders",
            "total_amount": 1500.0,
            "line_items": [{"cost_code": "06-110"}]
        });
        assert_eq!(extraction_confidence(&candidate), 1.0);
    }

    #[test]
    fn test_confidence_penalizes_placeholder_codes() {
        let candidate = serde_json::json!({
            "document_number": "INV-1001",
            "date": "2026-02-10",
            "vendor_name": "Acme Builders",
            "total_amount": 1500.0,
            "line_items": [{"cost_code": "99-999"}, {"cost_code": "06-110"}]
        });
        assert_eq!(extraction_confidence(&candidate), 0.75);
    }

    #[test]
    fn test_confidence_missing_fields() {
        let candidate = serde_json::json!({
            "document_number": "INV-1001",
            "date": "2026-02-10"
        });
        assert_eq!(extraction_confidence(&candidate), 0.4);
    }
}

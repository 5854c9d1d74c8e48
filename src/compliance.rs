//! Agreement compliance auditing
//!
//! Deterministic rules comparing a structured record against the terms of
//! its referenced agreement: retention, unit prices, billing cap, scope.
//! Agreement lookups go through the `AgreementStore` seam.

use crate::models::{
    AgreementTerms, ComplianceAnomaly, ComplianceAnomalyKind, DocumentRecord, Severity,
};
use crate::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Trait for agreement lookups and prior-billing aggregation
#[async_trait::async_trait]
pub trait AgreementStore: Send + Sync {
    async fn get_agreement(&self, agreement_id: &str) -> Result<Option<AgreementTerms>>;

    /// Total already billed against the agreement, excluding the record
    /// under audit.
    async fn sum_billed_against(&self, agreement_id: &str) -> Result<Decimal>;
}

/// In-memory agreement store for development and tests
#[derive(Default)]
pub struct InMemoryAgreementStore {
    agreements: Arc<RwLock<HashMap<String, AgreementTerms>>>,
    billed: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl InMemoryAgreementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_agreement(&self, agreement_id: &str, terms: AgreementTerms) {
        let mut agreements = self.agreements.write().await;
        agreements.insert(agreement_id.to_string(), terms);
    }

    pub async fn record_billing(&self, agreement_id: &str, amount: Decimal) {
        let mut billed = self.billed.write().await;
        *billed.entry(agreement_id.to_string()).or_insert(Decimal::ZERO) += amount;
    }
}

#[async_trait::async_trait]
impl AgreementStore for InMemoryAgreementStore {
    async fn get_agreement(&self, agreement_id: &str) -> Result<Option<AgreementTerms>> {
        let agreements = self.agreements.read().await;
        Ok(agreements.get(agreement_id).cloned())
    }

    async fn sum_billed_against(&self, agreement_id: &str) -> Result<Decimal> {
        let billed = self.billed.read().await;
        Ok(billed.get(agreement_id).copied().unwrap_or(Decimal::ZERO))
    }
}

/// Audits records for compliance with their agreement's terms
pub struct ComplianceAuditor {
    agreements: Arc<dyn AgreementStore>,
}

impl ComplianceAuditor {
    pub fn new(agreements: Arc<dyn AgreementStore>) -> Self {
        Self { agreements }
    }

    /// Run the full audit. The two lookup failures are terminal; the four
    /// term rules are independent and cumulative.
    pub async fn audit(&self, record: &DocumentRecord) -> Result<Vec<ComplianceAnomaly>> {
        info!(
            document_number = %record.document_number,
            agreement_id = ?record.agreement_id,
            "Starting compliance audit"
        );

        let mut anomalies = Vec::new();

        let agreement_id = match record.agreement_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                warn!(
                    document_number = %record.document_number,
                    "Cannot audit record without an agreement reference"
                );
                anomalies.push(base_anomaly(
                    ComplianceAnomalyKind::MissingContract,
                    Severity::High,
                    "Record has no associated agreement for compliance validation".to_string(),
                    "UNKNOWN",
                ));
                return Ok(anomalies);
            }
        };

        let terms = match self.agreements.get_agreement(agreement_id).await? {
            Some(terms) => terms,
            None => {
                warn!(agreement_id = %agreement_id, "Agreement not found");
                anomalies.push(base_anomaly(
                    ComplianceAnomalyKind::ContractNotFound,
                    Severity::Critical,
                    format!("Agreement {} not found in knowledge store", agreement_id),
                    agreement_id,
                ));
                return Ok(anomalies);
            }
        };

        anomalies.extend(check_retention(record, agreement_id, &terms));
        anomalies.extend(check_unit_prices(record, agreement_id, &terms));
        anomalies.extend(self.check_billing_cap(record, agreement_id, &terms).await?);
        anomalies.extend(check_scope(record, agreement_id, &terms));

        info!(
            document_number = %record.document_number,
            anomalies_found = anomalies.len(),
            "Compliance audit completed"
        );

        Ok(anomalies)
    }

    /// The prior-billing aggregate is read fresh on every audit, so two
    /// in-flight documents against the same agreement can both pass before
    /// either is recorded. The cap is a detective control, not a hard
    /// financial control.
    async fn check_billing_cap(
        &self,
        record: &DocumentRecord,
        agreement_id: &str,
        terms: &AgreementTerms,
    ) -> Result<Vec<ComplianceAnomaly>> {
        let Some(cap) = terms.billing_cap else {
            return Ok(Vec::new());
        };

        let total_billed = self.agreements.sum_billed_against(agreement_id).await?;
        let total_with_current = total_billed + record.total_amount;

        if total_with_current <= cap {
            return Ok(Vec::new());
        }

        let overage = total_with_current - cap;
        let Some(overage_percent) = overage.checked_div(cap).map(|f| f * Decimal::from(100))
        else {
            return Ok(Vec::new());
        };

        let severity = if overage_percent > Decimal::from(10) {
            Severity::Critical
        } else {
            Severity::High
        };

        let mut a = base_anomaly(
            ComplianceAnomalyKind::BillingCapExceeded,
            severity,
            format!(
                "Billing cap exceeded: total billing ${} exceeds agreement cap ${} (overage: ${}, {}%)",
                total_with_current,
                cap,
                overage,
                overage_percent.round_dp(1)
            ),
            agreement_id,
        );
        a.clause = Some("Agreement Value/Billing Cap".to_string());
        a.expected = Some(json!(cap));
        a.actual = Some(json!(total_with_current));

        warn!(
            agreement_id = %agreement_id,
            billing_cap = %cap,
            total_billed = %total_with_current,
            "Billing cap exceeded"
        );

        Ok(vec![a])
    }
}

fn base_anomaly(
    kind: ComplianceAnomalyKind,
    severity: Severity,
    message: String,
    agreement_id: &str,
) -> ComplianceAnomaly {
    ComplianceAnomaly {
        kind,
        severity,
        message,
        agreement_id: agreement_id.to_string(),
        clause: None,
        expected: None,
        actual: None,
        line_item_id: None,
        cost_code: None,
        detected_at: Utc::now(),
    }
}

/// Expected retention is total x retention_rate; actual is the sum of
/// line items whose description mentions retention. Flag when the gap
/// exceeds 1% of the total.
fn check_retention(
    record: &DocumentRecord,
    agreement_id: &str,
    terms: &AgreementTerms,
) -> Vec<ComplianceAnomaly> {
    let expected_retention = record.total_amount * terms.retention_rate;

    let actual_retention: Decimal = record
        .line_items
        .iter()
        .filter(|item| item.description.to_lowercase().contains("retention"))
        .map(|item| item.total)
        .sum();

    let tolerance = record.total_amount * Decimal::new(1, 2);
    let gap = (expected_retention - actual_retention).abs();

    if gap <= tolerance {
        return Vec::new();
    }

    let severity = if gap > expected_retention * Decimal::new(1, 1) {
        Severity::High
    } else {
        Severity::Medium
    };

    let mut a = base_anomaly(
        ComplianceAnomalyKind::RetentionViolation,
        severity,
        format!(
            "Retention amount mismatch: expected ${} ({}% of ${}), but found ${}",
            expected_retention.round_dp(2),
            (terms.retention_rate * Decimal::from(100)).normalize(),
            record.total_amount.round_dp(2),
            actual_retention.round_dp(2)
        ),
        agreement_id,
    );
    a.clause = Some("Retention Rate".to_string());
    a.expected = Some(json!(expected_retention));
    a.actual = Some(json!(actual_retention));

    warn!(
        agreement_id = %agreement_id,
        expected = %expected_retention,
        actual = %actual_retention,
        "Retention violation detected"
    );

    vec![a]
}

/// Each line item with a scheduled cost code must price at or under the
/// scheduled maximum plus tolerance. Unscheduled codes are left to the
/// scope rule.
fn check_unit_prices(
    record: &DocumentRecord,
    agreement_id: &str,
    terms: &AgreementTerms,
) -> Vec<ComplianceAnomaly> {
    let mut anomalies = Vec::new();

    if terms.unit_price_schedule.is_empty() {
        return anomalies;
    }

    for item in &record.line_items {
        let Some(&max_unit_price) = terms.unit_price_schedule.get(&item.cost_code) else {
            continue;
        };

        let tolerance = max_unit_price * terms.price_tolerance;
        if item.unit_price <= max_unit_price + tolerance {
            continue;
        }

        let overage = item.unit_price - max_unit_price;
        let Some(overage_percent) = overage
            .checked_div(max_unit_price)
            .map(|f| f * Decimal::from(100))
        else {
            continue;
        };

        let severity = if overage_percent > Decimal::from(20) {
            Severity::Critical
        } else if overage_percent > Decimal::from(10) {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut a = base_anomaly(
            ComplianceAnomalyKind::PriceMismatch,
            severity,
            format!(
                "Unit price for {} exceeds agreement schedule: ${} > ${} ({}% over limit)",
                item.cost_code,
                item.unit_price.round_dp(2),
                max_unit_price.round_dp(2),
                overage_percent.round_dp(1)
            ),
            agreement_id,
        );
        a.clause = Some("Unit Price Schedule".to_string());
        a.expected = Some(json!(max_unit_price));
        a.actual = Some(json!(item.unit_price));
        a.line_item_id = item.id.clone();
        a.cost_code = Some(item.cost_code.clone());

        warn!(
            agreement_id = %agreement_id,
            cost_code = %item.cost_code,
            max_price = %max_unit_price,
            actual_price = %item.unit_price,
            "Unit price violation"
        );

        anomalies.push(a);
    }

    anomalies
}

/// Every line item's cost code must be in the approved list, one anomaly
/// per offending item. Skipped entirely when no list is defined.
fn check_scope(
    record: &DocumentRecord,
    agreement_id: &str,
    terms: &AgreementTerms,
) -> Vec<ComplianceAnomaly> {
    let mut anomalies = Vec::new();

    if terms.approved_cost_codes.is_empty() {
        return anomalies;
    }

    for item in &record.line_items {
        if terms.approved_cost_codes.contains(&item.cost_code) {
            continue;
        }

        let mut a = base_anomaly(
            ComplianceAnomalyKind::ScopeViolation,
            Severity::High,
            format!(
                "Cost code '{}' is not in the approved scope for this agreement. Description: {}",
                item.cost_code, item.description
            ),
            agreement_id,
        );
        a.clause = Some("Approved Cost Codes/Scope".to_string());
        a.expected = Some(json!(terms.approved_cost_codes));
        a.actual = Some(json!(item.cost_code));
        a.line_item_id = item.id.clone();
        a.cost_code = Some(item.cost_code.clone());

        warn!(
            agreement_id = %agreement_id,
            cost_code = %item.cost_code,
            "Scope violation"
        );

        anomalies.push(a);
    }

    anomalies
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;
    use chrono::NaiveDate;

    fn item(description: &str, quantity: i64, unit_price: Decimal, cost_code: &str) -> LineItem {
        let quantity = Decimal::from(quantity);
        LineItem {
            id: Some(format!("li-{}", cost_code)),
            description: description.to_string(),
            quantity,
            unit_price,
            total: quantity * unit_price,
            cost_code: cost_code.to_string(),
        }
    }

    fn record(agreement_id: Option<&str>, total: Decimal, items: Vec<LineItem>) -> DocumentRecord {
        DocumentRecord {
            document_number: "INV-9001".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
            due_date: None,
            vendor_name: "Acme Builders".to_string(),
            agreement_id: agreement_id.map(|s| s.to_string()),
            total_amount: total,
            line_items: items,
        }
    }

    fn no_retention_terms() -> AgreementTerms {
        AgreementTerms {
            retention_rate: Decimal::ZERO,
            ..AgreementTerms::default()
        }
    }

    async fn auditor_with(agreement_id: &str, terms: AgreementTerms) -> ComplianceAuditor {
        let store = InMemoryAgreementStore::new();
        store.insert_agreement(agreement_id, terms).await;
        ComplianceAuditor::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_missing_agreement_reference() {
        let auditor = ComplianceAuditor::new(Arc::new(InMemoryAgreementStore::new()));
        let record = record(None, Decimal::from(1000), vec![]);

        let anomalies = auditor.audit(&record).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, ComplianceAnomalyKind::MissingContract);
        assert_eq!(anomalies[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_agreement_not_found() {
        let auditor = ComplianceAuditor::new(Arc::new(InMemoryAgreementStore::new()));
        let record = record(Some("AGR-404"), Decimal::from(1000), vec![]);

        let anomalies = auditor.audit(&record).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, ComplianceAnomalyKind::ContractNotFound);
        assert_eq!(anomalies[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_correct_retention_is_clean() {
        let terms = AgreementTerms {
            retention_rate: Decimal::new(10, 2),
            ..AgreementTerms::default()
        };
        let auditor = auditor_with("AGR-1", terms).await;

        // $10,000 total with a $1,000 retention line: exactly 10%.
        let record = record(
            Some("AGR-1"),
            Decimal::from(10_000),
            vec![
                item("Excavation", 9, Decimal::from(1000), "02-200"),
                item("Retention withheld", 1, Decimal::from(1000), "00-000"),
            ],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        assert!(anomalies
            .iter()
            .all(|a| a.kind != ComplianceAnomalyKind::RetentionViolation));
    }

    #[tokio::test]
    async fn test_missing_retention_is_high() {
        let terms = AgreementTerms {
            retention_rate: Decimal::new(10, 2),
            ..AgreementTerms::default()
        };
        let auditor = auditor_with("AGR-1", terms).await;

        // No retention line at all: gap equals the full expected amount.
        let record = record(
            Some("AGR-1"),
            Decimal::from(10_000),
            vec![item("Excavation", 10, Decimal::from(1000), "02-200")],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        let retention: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == ComplianceAnomalyKind::RetentionViolation)
            .collect();
        assert_eq!(retention.len(), 1);
        assert_eq!(retention[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_small_retention_gap_is_medium() {
        // 50% retention rate: the 1%-of-total tolerance is far below the
        // 10%-of-expected severity split, so a small gap lands on medium.
        let terms = AgreementTerms {
            retention_rate: Decimal::new(50, 2),
            ..AgreementTerms::default()
        };
        let auditor = auditor_with("AGR-1", terms).await;

        // Expected $500; actual $470. Gap $30 > $10 tolerance, < $50 split.
        let record = record(
            Some("AGR-1"),
            Decimal::from(1000),
            vec![
                item("Paving", 1, Decimal::from(530), "02-700"),
                item("Retention withheld", 1, Decimal::from(470), "00-000"),
            ],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        let retention: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == ComplianceAnomalyKind::RetentionViolation)
            .collect();
        assert_eq!(retention.len(), 1);
        assert_eq!(retention[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_price_overage_critical() {
        let mut terms = no_retention_terms();
        terms
            .unit_price_schedule
            .insert("03-300".to_string(), Decimal::from(550));
        let auditor = auditor_with("AGR-1", terms).await;

        // $700 vs a $550 max at 5% tolerance: 27.3% over, critical.
        let record = record(
            Some("AGR-1"),
            Decimal::from(700),
            vec![item("Structural steel", 1, Decimal::from(700), "03-300")],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, ComplianceAnomalyKind::PriceMismatch);
        assert_eq!(anomalies[0].severity, Severity::Critical);
        assert_eq!(anomalies[0].cost_code.as_deref(), Some("03-300"));
        assert!(anomalies[0].message.contains("27.3"));
    }

    #[tokio::test]
    async fn test_price_within_tolerance_is_clean() {
        let mut terms = no_retention_terms();
        terms
            .unit_price_schedule
            .insert("03-300".to_string(), Decimal::from(550));
        let auditor = auditor_with("AGR-1", terms).await;

        // $575 is under the $577.50 tolerance ceiling.
        let record = record(
            Some("AGR-1"),
            Decimal::from(575),
            vec![item("Structural steel", 1, Decimal::from(575), "03-300")],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_billing_cap_boundary() {
        // Cap $500,000, $450,000 already billed. A $100,000 invoice puts
        // the overage at exactly 10% of the cap: high, not critical.
        let terms = AgreementTerms {
            retention_rate: Decimal::ZERO,
            billing_cap: Some(Decimal::from(500_000)),
            ..AgreementTerms::default()
        };
        let store = InMemoryAgreementStore::new();
        store.insert_agreement("AGR-1", terms).await;
        store.record_billing("AGR-1", Decimal::from(450_000)).await;
        let auditor = ComplianceAuditor::new(Arc::new(store));

        let record = record(Some("AGR-1"), Decimal::from(100_000), vec![]);
        let anomalies = auditor.audit(&record).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, ComplianceAnomalyKind::BillingCapExceeded);
        assert_eq!(anomalies[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_billing_cap_past_boundary_is_critical() {
        let terms = AgreementTerms {
            retention_rate: Decimal::ZERO,
            billing_cap: Some(Decimal::from(500_000)),
            ..AgreementTerms::default()
        };
        let store = InMemoryAgreementStore::new();
        store.insert_agreement("AGR-1", terms).await;
        store.record_billing("AGR-1", Decimal::from(450_000)).await;
        let auditor = ComplianceAuditor::new(Arc::new(store));

        // $110,000 makes the overage 12% of the cap.
        let record = record(Some("AGR-1"), Decimal::from(110_000), vec![]);
        let anomalies = auditor.audit(&record).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_scope_violation_per_item() {
        let terms = AgreementTerms {
            retention_rate: Decimal::ZERO,
            approved_cost_codes: vec!["02-200".to_string(), "03-300".to_string()],
            ..AgreementTerms::default()
        };
        let auditor = auditor_with("AGR-1", terms).await;

        let record = record(
            Some("AGR-1"),
            Decimal::from(1500),
            vec![
                item("Excavation", 1, Decimal::from(1000), "02-200"),
                item("Landscaping", 1, Decimal::from(500), "32-900"),
            ],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, ComplianceAnomalyKind::ScopeViolation);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].cost_code.as_deref(), Some("32-900"));
        assert_eq!(anomalies[0].line_item_id.as_deref(), Some("li-32-900"));
    }

    #[tokio::test]
    async fn test_rules_are_cumulative() {
        let mut terms = no_retention_terms();
        terms
            .unit_price_schedule
            .insert("03-300".to_string(), Decimal::from(100));
        terms.approved_cost_codes = vec!["03-300".to_string()];
        let auditor = auditor_with("AGR-1", terms).await;

        let record = record(
            Some("AGR-1"),
            Decimal::from(700),
            vec![
                item("Structural steel", 1, Decimal::from(200), "03-300"),
                item("Landscaping", 1, Decimal::from(500), "32-900"),
            ],
        );

        let anomalies = auditor.audit(&record).await.unwrap();
        assert!(anomalies
            .iter()
            .any(|a| a.kind == ComplianceAnomalyKind::PriceMismatch));
        assert!(anomalies
            .iter()
            .any(|a| a.kind == ComplianceAnomalyKind::ScopeViolation));
    }
}

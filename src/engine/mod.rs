//! Workflow engine - checkpointed state machine
//!
//! Drives one document through the node graph:
//!
//! extract_text → structure_record → validate → compliance_audit
//!   → insert_graph → embed → finalize
//!
//! with the critic retry loop, quarantine suspension and the error
//! handler as the failure terminal. After every node the accumulated
//! state is checkpointed, so a quarantined document resumes from its
//! last snapshot without replay.

mod nodes;
pub mod routing;

use crate::compliance::{AgreementStore, ComplianceAuditor};
use crate::config::PipelineConfig;
use crate::critic::RetryController;
use crate::extract::TextExtractor;
use crate::graph::{KnowledgeStore, VectorIndex};
use crate::risk::RiskScorer;
use crate::state::{NodeId, WorkflowState};
use crate::store::WorkflowStateStore;
use crate::structurer::RecordStructurer;
use crate::validate::{create_default_validator, RecordValidator};
use crate::Result;
use routing::{
    after_compliance, after_extraction, after_graph_insert, after_structuring, after_validation,
    ComplianceRoute, ExtractionRoute, GraphRoute, StructureRoute, ValidationRoute,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Where the run goes after a node completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Next(NodeId),
    /// Suspended awaiting human review; resumable.
    Suspended,
    /// Terminal for this run.
    Complete,
}

/// The checkpointed state machine for one document type of work.
pub struct WorkflowEngine {
    pub(crate) extractor: Arc<dyn TextExtractor>,
    pub(crate) structurer: Arc<dyn RecordStructurer>,
    pub(crate) validator: RecordValidator,
    pub(crate) auditor: ComplianceAuditor,
    pub(crate) scorer: RiskScorer,
    pub(crate) critic: RetryController,
    pub(crate) knowledge_store: Arc<dyn KnowledgeStore>,
    pub(crate) vector_index: Arc<dyn VectorIndex>,
    store: Arc<dyn WorkflowStateStore>,
    pub(crate) config: PipelineConfig,
}

impl WorkflowEngine {
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn TextExtractor>,
        structurer: Arc<dyn RecordStructurer>,
        agreements: Arc<dyn AgreementStore>,
        knowledge_store: Arc<dyn KnowledgeStore>,
        vector_index: Arc<dyn VectorIndex>,
        store: Arc<dyn WorkflowStateStore>,
    ) -> Self {
        Self {
            extractor,
            structurer,
            validator: create_default_validator(),
            auditor: ComplianceAuditor::new(agreements),
            scorer: RiskScorer::new(config.risk_thresholds),
            critic: RetryController::new(config.max_retries),
            knowledge_store,
            vector_index,
            store,
            config,
        }
    }

    /// Run a fresh workflow from the entry node.
    pub async fn run(&self, state: WorkflowState) -> Result<WorkflowState> {
        self.run_from(state, NodeId::ExtractText).await
    }

    /// Drive the state machine from `entry` until it completes or
    /// suspends, checkpointing after every node.
    pub async fn run_from(&self, mut state: WorkflowState, entry: NodeId) -> Result<WorkflowState> {
        let mut node = entry;

        info!(
            document_id = %state.document_id,
            entry = %entry,
            "Workflow run started"
        );

        loop {
            state.current_node = Some(node);
            debug!(document_id = %state.document_id, node = %node, "Executing node");

            let update = self.execute_node(node, &state).await;
            state.apply(update);

            self.store.save(&state).await?;

            match self.next_transition(node, &state) {
                Transition::Next(next) => node = next,
                Transition::Suspended => {
                    info!(
                        document_id = %state.document_id,
                        pause_reason = ?state.pause_reason,
                        "Workflow suspended for review"
                    );
                    break;
                }
                Transition::Complete => {
                    info!(
                        document_id = %state.document_id,
                        status = %state.status,
                        "Workflow run complete"
                    );
                    break;
                }
            }
        }

        Ok(state)
    }

    async fn execute_node(&self, node: NodeId, state: &WorkflowState) -> crate::state::StateUpdate {
        match node {
            NodeId::ExtractText => self.node_extract_text(state).await,
            NodeId::StructureRecord => self.node_structure_record(state).await,
            NodeId::Validate => self.node_validate(state).await,
            NodeId::ComplianceAudit => self.node_compliance_audit(state).await,
            NodeId::Critic => self.node_critic(state).await,
            NodeId::Quarantine => self.node_quarantine(state).await,
            NodeId::InsertGraph => self.node_insert_graph(state).await,
            NodeId::Embed => self.node_embed(state).await,
            NodeId::Finalize => self.node_finalize(state).await,
            NodeId::ErrorHandler => self.node_error_handler(state).await,
        }
    }

    /// The full transition table: node × routing outcome → next node.
    fn next_transition(&self, node: NodeId, state: &WorkflowState) -> Transition {
        match node {
            NodeId::ExtractText => match after_extraction(state) {
                ExtractionRoute::Continue => Transition::Next(NodeId::StructureRecord),
                ExtractionRoute::Error => Transition::Next(NodeId::ErrorHandler),
            },
            NodeId::StructureRecord => match after_structuring(state, &self.critic) {
                StructureRoute::Validate => Transition::Next(NodeId::Validate),
                StructureRoute::Retry => Transition::Next(NodeId::Critic),
                StructureRoute::Quarantine => Transition::Next(NodeId::Quarantine),
            },
            NodeId::Critic => Transition::Next(NodeId::StructureRecord),
            NodeId::Validate => match after_validation(state, &self.critic) {
                ValidationRoute::Clean => Transition::Next(NodeId::ComplianceAudit),
                ValidationRoute::Correctable => Transition::Next(NodeId::Critic),
                ValidationRoute::Quarantine => Transition::Next(NodeId::Quarantine),
            },
            NodeId::ComplianceAudit => match after_compliance(state, &self.config) {
                ComplianceRoute::Clean => Transition::Next(NodeId::InsertGraph),
                ComplianceRoute::Quarantine => Transition::Next(NodeId::Quarantine),
            },
            NodeId::InsertGraph => match after_graph_insert(state) {
                GraphRoute::Embed => Transition::Next(NodeId::Embed),
                GraphRoute::Finalize => Transition::Next(NodeId::Finalize),
            },
            NodeId::Embed => Transition::Next(NodeId::Finalize),
            NodeId::Quarantine => Transition::Suspended,
            NodeId::Finalize | NodeId::ErrorHandler => Transition::Complete,
        }
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::InMemoryAgreementStore;
    use crate::extract::MockExtractor;
    use crate::graph::{InMemoryKnowledgeStore, InMemoryVectorIndex};
    use crate::models::{AgreementTerms, DocumentType, WorkflowStatus};
    use crate::store::InMemoryWorkflowStore;
    use crate::structurer::MockStructurer;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn clean_candidate() -> Value {
        json!({
            "document_number": "INV-100",
            "date": "2026-01-15",
            "due_date": "2026-02-15",
            "vendor_name": "Acme Builders",
            "agreement_id": "AGR-1",
            "total_amount": "1000.00",
            "line_items": [{
                "id": "li-1",
                "description": "Excavation work",
                "quantity": "2",
                "unit_price": "500.00",
                "total": "1000.00",
                "cost_code": "02-200"
            }]
        })
    }

    struct Harness {
        engine: WorkflowEngine,
        store: Arc<InMemoryWorkflowStore>,
        knowledge: Arc<InMemoryKnowledgeStore>,
        vectors: Arc<InMemoryVectorIndex>,
    }

    async fn harness(
        extractor: MockExtractor,
        structurer: Arc<MockStructurer>,
        knowledge: InMemoryKnowledgeStore,
        vectors: InMemoryVectorIndex,
    ) -> Harness {
        let agreements = InMemoryAgreementStore::new();
        agreements
            .insert_agreement(
                "AGR-1",
                AgreementTerms {
                    retention_rate: Decimal::ZERO,
                    ..AgreementTerms::default()
                },
            )
            .await;

        let store = Arc::new(InMemoryWorkflowStore::new());
        let knowledge = Arc::new(knowledge);
        let vectors = Arc::new(vectors);

        let engine = WorkflowEngine::new(
            PipelineConfig::default(),
            Arc::new(extractor),
            structurer,
            Arc::new(agreements),
            knowledge.clone(),
            vectors.clone(),
            store.clone(),
        );

        Harness {
            engine,
            store,
            knowledge,
            vectors,
        }
    }

    fn new_state() -> WorkflowState {
        WorkflowState::new(Uuid::new_v4(), "/tmp/invoice.txt", DocumentType::Invoice, 3)
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let h = harness(
            MockExtractor::returning("Invoice INV-100 from Acme Builders"),
            Arc::new(MockStructurer::always(clean_candidate())),
            InMemoryKnowledgeStore::new(),
            InMemoryVectorIndex::new(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(!state.paused);
        assert!(state.store_written);
        assert!(state.record_id.is_some());
        assert_eq!(state.retry_count, 0);
        assert_eq!(h.knowledge.len().await, 1);
        assert_eq!(h.vectors.len().await, 1);

        let report = state.final_report.as_ref().unwrap();
        assert_eq!(report.record_number.as_deref(), Some("INV-100"));

        // The last checkpoint is the terminal snapshot.
        let stored = h.store.get(state.document_id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert_eq!(stored.state.current_node, Some(NodeId::Finalize));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_fatal() {
        let h = harness(
            MockExtractor::failing(),
            Arc::new(MockStructurer::always(clean_candidate())),
            InMemoryKnowledgeStore::new(),
            InMemoryVectorIndex::new(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.error_history.len(), 1);
        assert_eq!(state.error_history[0].node, "extract_text");

        let report = state.final_report.as_ref().unwrap();
        assert_eq!(report.last_successful_node.as_deref(), Some("none"));
    }

    #[tokio::test]
    async fn test_structuring_retries_then_quarantines() {
        let structurer = Arc::new(MockStructurer::scripted(vec![
            Err("malformed output".to_string()),
            Err("malformed output".to_string()),
            Err("malformed output".to_string()),
            Err("malformed output".to_string()),
        ]));

        let h = harness(
            MockExtractor::returning("garbled scan"),
            structurer,
            InMemoryKnowledgeStore::new(),
            InMemoryVectorIndex::new(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Quarantined);
        assert!(state.paused);
        // Exactly max_retries critic passes before giving up.
        assert_eq!(state.retry_count, 3);
        assert!(state
            .pause_reason
            .as_deref()
            .unwrap()
            .contains("Max retries"));
        // 1 initial attempt + 3 retries, each recorded.
        assert_eq!(state.error_history.len(), 4);
    }

    #[tokio::test]
    async fn test_medium_risk_corrects_and_completes() {
        let mut future_dated = clean_candidate();
        future_dated["date"] = json!("2031-01-01");
        future_dated["due_date"] = json!("2031-02-01");

        let structurer = Arc::new(MockStructurer::scripted_with_fallback(
            vec![Ok(future_dated)],
            clean_candidate(),
        ));

        let h = harness(
            MockExtractor::returning("Invoice INV-100"),
            structurer.clone(),
            InMemoryKnowledgeStore::new(),
            InMemoryVectorIndex::new(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.retry_count, 1);
        assert!(state.store_written);
        // The retry attempt saw the critic's guidance.
        assert!(structurer.last_feedback().unwrap().contains("dates"));
        // The first run's anomaly stays in the append-only history.
        assert_eq!(state.structural_anomalies.len(), 1);
    }

    #[tokio::test]
    async fn test_high_risk_quarantines_without_retry() {
        let mut bad = clean_candidate();
        // Broken line math and a mismatched total: two high anomalies.
        bad["line_items"][0]["total"] = json!("900.00");

        let h = harness(
            MockExtractor::returning("Invoice INV-100"),
            Arc::new(MockStructurer::always(bad)),
            InMemoryKnowledgeStore::new(),
            InMemoryVectorIndex::new(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Quarantined);
        assert!(state.paused);
        assert_eq!(state.retry_count, 0);
        assert!(state
            .pause_reason
            .as_deref()
            .unwrap()
            .contains("High risk level: high"));
        // Nothing reached the knowledge store.
        assert_eq!(h.knowledge.len().await, 0);
    }

    #[tokio::test]
    async fn test_graph_failure_degrades_gracefully() {
        let h = harness(
            MockExtractor::returning("Invoice INV-100"),
            Arc::new(MockStructurer::always(clean_candidate())),
            InMemoryKnowledgeStore::failing(),
            InMemoryVectorIndex::new(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        // Still completes; embedding skipped; failure recorded.
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(!state.store_written);
        assert!(state.record_id.is_none());
        assert_eq!(h.vectors.len().await, 0);
        assert!(state
            .error_history
            .iter()
            .any(|e| e.node == "insert_graph"));
    }

    #[tokio::test]
    async fn test_embed_failure_is_ignored() {
        let h = harness(
            MockExtractor::returning("Invoice INV-100"),
            Arc::new(MockStructurer::always(clean_candidate())),
            InMemoryKnowledgeStore::new(),
            InMemoryVectorIndex::failing(),
        )
        .await;

        let state = h.engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(state.store_written);
    }

    #[tokio::test]
    async fn test_compliance_violations_quarantine() {
        // Price far over schedule plus an out-of-scope item: one critical
        // anomaly trips the threshold.
        let agreements = InMemoryAgreementStore::new();
        let mut terms = AgreementTerms {
            retention_rate: Decimal::ZERO,
            ..AgreementTerms::default()
        };
        terms
            .unit_price_schedule
            .insert("02-200".to_string(), Decimal::from(100));
        agreements.insert_agreement("AGR-1", terms).await;

        let store = Arc::new(InMemoryWorkflowStore::new());
        let engine = WorkflowEngine::new(
            PipelineConfig::default(),
            Arc::new(MockExtractor::returning("Invoice INV-100")),
            Arc::new(MockStructurer::always(clean_candidate())),
            Arc::new(agreements),
            Arc::new(InMemoryKnowledgeStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
            store.clone(),
        );

        let state = engine.run(new_state()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Quarantined);
        assert!(state.paused);
        assert_eq!(state.compliance_anomalies.len(), 1);
        assert!(state
            .pause_reason
            .as_deref()
            .unwrap()
            .contains("compliance violations"));
    }
}

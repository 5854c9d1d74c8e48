use financial_document_pipeline::{
    compliance::InMemoryAgreementStore,
    config::PipelineConfig,
    engine::WorkflowEngine,
    extract::MockExtractor,
    graph::{InMemoryKnowledgeStore, InMemoryVectorIndex},
    manager::WorkflowManager,
    models::{AgreementTerms, DocumentType, HumanFeedback},
    store::{InMemoryWorkflowStore, PostgresWorkflowStore, WorkflowStateStore},
    structurer::MockStructurer,
    WorkflowStatus,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();
    let config = PipelineConfig::from_env();

    info!("Financial Document Pipeline starting");

    let store: Arc<dyn WorkflowStateStore> = match &config.database_url {
        Some(url) => {
            info!("Workflow state store backend: postgres");
            Arc::new(PostgresWorkflowStore::connect_lazy(url)?)
        }
        None => {
            info!("Workflow state store backend: in-memory");
            Arc::new(InMemoryWorkflowStore::new())
        }
    };

    // Demo agreement with a unit price schedule and an approved scope
    let agreements = InMemoryAgreementStore::new();
    let mut terms = AgreementTerms {
        retention_rate: Decimal::new(10, 2),
        billing_cap: Some(Decimal::from(500_000)),
        approved_cost_codes: vec!["02-200".to_string(), "00-000".to_string()],
        ..AgreementTerms::default()
    };
    terms
        .unit_price_schedule
        .insert("02-200".to_string(), Decimal::from(550));
    agreements.insert_agreement("AGR-1", terms).await;

    // Demo collaborators: a canned extraction and a scripted structurer
    let extractor = MockExtractor::returning(
        "INVOICE INV-100\nAcme Builders\nAgreement AGR-1\nExcavation work 18 x $500.00 = $9,000.00\nRetention withheld $1,000.00\nTOTAL $10,000.00",
    );
    let structurer = MockStructurer::always(serde_json::json!({
        "document_number": "INV-100",
        "date": "2026-07-20",
        "due_date": "2026-08-20",
        "vendor_name": "Acme Builders",
        "agreement_id": "AGR-1",
        "total_amount": "10000.00",
        "line_items": [
            {
                "id": "li-1",
                "description": "Excavation work",
                "quantity": "18",
                "unit_price": "500.00",
                "total": "9000.00",
                "cost_code": "02-200"
            },
            {
                "id": "li-2",
                "description": "Retention withheld",
                "quantity": "1",
                "unit_price": "1000.00",
                "total": "1000.00",
                "cost_code": "00-000"
            }
        ]
    }));

    let engine = WorkflowEngine::new(
        config.clone(),
        Arc::new(extractor),
        Arc::new(structurer),
        Arc::new(agreements),
        Arc::new(InMemoryKnowledgeStore::new()),
        Arc::new(InMemoryVectorIndex::new()),
        store.clone(),
    );
    let manager = WorkflowManager::new(engine, store, config);

    info!("Submitting demo invoice");
    let state = manager
        .submit("/tmp/demo-invoice.txt", DocumentType::Invoice)
        .await?;

    println!("\n=== WORKFLOW RESULT ===");
    println!("Document ID: {}", state.document_id);
    println!("Status: {}", state.status);
    if let Some(risk) = state.risk_level {
        println!("Risk Level: {}", risk);
    }
    println!("Retries: {}", state.retry_count);
    if let Some(report) = &state.final_report {
        println!(
            "Record: {} (store id: {})",
            report.record_number.as_deref().unwrap_or("n/a"),
            report.record_id.as_deref().unwrap_or("n/a"),
        );
        println!(
            "Anomalies: {} structural, {} compliance",
            report.structural_anomaly_count, report.compliance_anomaly_count
        );
    }

    // If the document landed in quarantine, show the review queue and
    // approve it, exercising the resume path.
    if state.status == WorkflowStatus::Quarantined {
        println!("\n=== QUARANTINE QUEUE ===");
        for row in manager.list_quarantined().await? {
            println!(
                "{} - {} ({})",
                row.document_id,
                row.state.pause_reason.as_deref().unwrap_or("unknown"),
                row.risk_level
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unscored".to_string()),
            );
        }

        info!("Approving quarantined workflow");
        let resumed = manager
            .resume(
                state.document_id,
                HumanFeedback {
                    approved: true,
                    corrections: None,
                    notes: Some("Reviewed in demo".to_string()),
                },
            )
            .await?;
        println!("\nAfter review: {}", resumed.status);
    }

    Ok(())
}

//! Financial Document Pipeline
//!
//! A durable, resumable ingestion engine that:
//! - Extracts raw text from financial documents (invoices, contracts, budgets)
//! - Structures it into validated records, with bounded correction retries
//! - Audits records against agreement terms (deterministic rule engine)
//! - Scores risk and quarantines high-risk documents for human review
//! - Upserts accepted records into a knowledge store and vector index
//! - Checkpoints state after every step for replay-free resumption
//!
//! WORKFLOW:
//! EXTRACT → STRUCTURE → VALIDATE → AUDIT → INSERT → EMBED → FINALIZE
//!           ↑← CRITIC ←┘        (quarantine on high risk / exhausted retries)

pub mod compliance;
pub mod config;
pub mod critic;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph;
pub mod manager;
pub mod models;
pub mod risk;
pub mod state;
pub mod store;
pub mod structurer;
pub mod validate;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use state::{NodeId, StateUpdate, WorkflowState};

//! Error types for the document-processing pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Structuring error: {0}")]
    StructuringError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Compliance error: {0}")]
    ComplianceError(String),

    #[error("Graph store error: {0}")]
    GraphError(String),

    #[error("Vector index error: {0}")]
    VectorIndexError(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow state: {0}")]
    InvalidState(String),

    #[error("Retry budget exhausted: {0}")]
    RetryBudgetExhausted(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

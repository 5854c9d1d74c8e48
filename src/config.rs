//! Pipeline configuration
//!
//! Defaults cover the common case; `from_env` overrides from the
//! environment (the binary loads `.env` first).

use crate::risk::RiskThresholds;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Correction attempts allowed before quarantine.
    pub max_retries: u32,

    /// Severity-count thresholds shared by the risk scorer and the
    /// compliance routing decision.
    pub risk_thresholds: RiskThresholds,

    /// Feature flags
    pub enable_compliance_audit: bool,
    pub enable_vector_embedding: bool,

    /// Postgres connection string for the workflow state store.
    pub database_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            risk_thresholds: RiskThresholds::default(),
            enable_compliance_audit: true,
            enable_vector_embedding: true,
            database_url: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_retries: env_parse("PIPELINE_MAX_RETRIES", defaults.max_retries),
            risk_thresholds: RiskThresholds {
                critical_threshold: env_parse(
                    "COMPLIANCE_CRITICAL_THRESHOLD",
                    defaults.risk_thresholds.critical_threshold,
                ),
                high_threshold: env_parse(
                    "COMPLIANCE_HIGH_THRESHOLD",
                    defaults.risk_thresholds.high_threshold,
                ),
            },
            enable_compliance_audit: env_flag(
                "ENABLE_COMPLIANCE_AUDIT",
                defaults.enable_compliance_audit,
            ),
            enable_vector_embedding: env_flag(
                "ENABLE_VECTOR_EMBEDDING",
                defaults.enable_vector_embedding,
            ),
            database_url: env::var("POSTGRES_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

//! Risk scoring
//!
//! Pure function folding structural and compliance anomaly severities
//! into one ordinal risk level used for routing.

use crate::models::{ComplianceAnomaly, RiskLevel, Severity, StructuralAnomaly};
use serde::{Deserialize, Serialize};

/// Severity-count thresholds for the top two risk buckets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub critical_threshold: usize,
    pub high_threshold: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            critical_threshold: 1,
            high_threshold: 2,
        }
    }
}

/// Scores anomalies from both sources into a single risk level.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer {
    thresholds: RiskThresholds,
}

impl RiskScorer {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Tally severities across both anomaly sources and bucket them.
    ///
    /// The arms are evaluated strictly top-down. The two Medium arms
    /// overlap (a single High below the high threshold already lands on
    /// Medium); they are kept as written because the ordering is
    /// load-bearing, not normalized into a disjoint partition.
    pub fn score(
        &self,
        structural: &[StructuralAnomaly],
        compliance: &[ComplianceAnomaly],
    ) -> RiskLevel {
        let mut critical = 0usize;
        let mut high = 0usize;
        let mut medium = 0usize;

        let severities = structural
            .iter()
            .map(|a| a.severity)
            .chain(compliance.iter().map(|a| a.severity));

        for severity in severities {
            match severity {
                Severity::Critical => critical += 1,
                Severity::High => high += 1,
                Severity::Medium => medium += 1,
                Severity::Low => {}
            }
        }

        if critical >= self.thresholds.critical_threshold {
            RiskLevel::Critical
        } else if high >= self.thresholds.high_threshold {
            RiskLevel::High
        } else if medium >= 3 {
            RiskLevel::Medium
        } else if high >= 1 || medium >= 1 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

//
// ================= Tests =================
//

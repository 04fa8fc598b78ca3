//! Findings and the validation report.

use crate::category::FindingCategory;
use crate::types::{Severity, ValidationStatus};
use serde::{Deserialize, Serialize};

/// One classified check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// What kind of discrepancy this is, with its repair data.
    pub category: FindingCategory,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// What the stored record expected, where meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// What the host actually had, where meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Finding {
    /// Create a finding.
    pub fn new(category: FindingCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Attach the expected value.
    #[must_use]
    pub fn expected(mut self, value: impl Into<String>) -> Self {
        self.expected = Some(value.into());
        self
    }

    /// Attach the actual value.
    #[must_use]
    pub fn actual(mut self, value: impl Into<String>) -> Self {
        self.actual = Some(value.into());
        self
    }
}

/// The transient result of one validation run: findings bucketed the way
/// callers consume them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Checks that passed.
    pub passed: Vec<Finding>,
    /// Warning-level drift.
    pub warnings: Vec<Finding>,
    /// Error- and critical-level drift.
    pub issues: Vec<Finding>,
}

impl ValidationReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a finding into the bucket its severity demands.
    pub fn add(&mut self, finding: Finding) {
        match finding.severity {
            Severity::Passed => self.passed.push(finding),
            Severity::Warning => self.warnings.push(finding),
            Severity::Error | Severity::Critical => self.issues.push(finding),
        }
    }

    /// Whether any finding is critical.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.issues
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    /// The aggregation rule: critical beats error beats warning.
    #[must_use]
    pub fn status(&self) -> ValidationStatus {
        if self.has_critical() {
            ValidationStatus::Failed
        } else if !self.issues.is_empty() {
            ValidationStatus::NeedsFixes
        } else if !self.warnings.is_empty() {
            ValidationStatus::PassedWithWarnings
        } else {
            ValidationStatus::Passed
        }
    }

    /// All findings needing repair, warnings first then issues, preserving
    /// check order within each bucket.
    pub fn actionable(&self) -> impl Iterator<Item = &Finding> {
        self.warnings.iter().chain(self.issues.iter())
    }

    /// Total findings across all buckets.
    #[must_use]
    pub fn total(&self) -> usize {
        self.passed.len() + self.warnings.len() + self.issues.len()
    }
}

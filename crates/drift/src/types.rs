//! Core severity and outcome types for drift handling.

use serde::{Deserialize, Serialize};

/// How serious a single finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The check passed; recorded for completeness.
    Passed,
    /// Drift that either side could be right about, or cosmetic damage.
    Warning,
    /// Drift that breaks the tenant and has a known repair.
    Error,
    /// The tenant is fundamentally absent or unservable.
    Critical,
}

impl Severity {
    /// Whether this severity represents something needing repair.
    #[must_use]
    pub fn needs_repair(&self) -> bool {
        !matches!(self, Self::Passed)
    }
}

/// Overall outcome of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Every check passed.
    Passed,
    /// Only warnings; the tenant serves traffic.
    PassedWithWarnings,
    /// At least one error; repair required.
    NeedsFixes,
    /// At least one critical finding.
    Failed,
}

impl ValidationStatus {
    /// Stable string form, used in persisted snapshots and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::PassedWithWarnings => "passed_with_warnings",
            Self::NeedsFixes => "needs_fixes",
            Self::Failed => "failed",
        }
    }

    /// Whether the tenant is in a servable state.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Passed | Self::PassedWithWarnings)
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of applying a single repair action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    /// The action changed remote or stored state.
    Fixed,
    /// The action found nothing left to do.
    NoChange,
    /// The action was not executed.
    Skipped {
        /// Why it was skipped (dry run, cancellation).
        reason: String,
    },
    /// The action ran and failed.
    Failed {
        /// Error message, including captured remote output where available.
        error: String,
    },
}

impl RepairOutcome {
    /// Whether the outcome represents success (no failure).
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Summary of a repair run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairSummary {
    pub fixed: usize,
    pub no_change: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RepairSummary {
    /// Fold one outcome into the summary.
    pub fn add_outcome(&mut self, outcome: &RepairOutcome) {
        match outcome {
            RepairOutcome::Fixed => self.fixed += 1,
            RepairOutcome::NoChange => self.no_change += 1,
            RepairOutcome::Skipped { .. } => self.skipped += 1,
            RepairOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Overall success: no action failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of actions processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.fixed + self.no_change + self.skipped + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_needs_repair() {
        assert!(!Severity::Passed.needs_repair());
        assert!(Severity::Warning.needs_repair());
        assert!(Severity::Error.needs_repair());
        assert!(Severity::Critical.needs_repair());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Passed);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ValidationStatus::Passed.as_str(), "passed");
        assert_eq!(
            ValidationStatus::PassedWithWarnings.as_str(),
            "passed_with_warnings"
        );
        assert_eq!(ValidationStatus::NeedsFixes.as_str(), "needs_fixes");
        assert_eq!(ValidationStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_status_health() {
        assert!(ValidationStatus::Passed.is_healthy());
        assert!(ValidationStatus::PassedWithWarnings.is_healthy());
        assert!(!ValidationStatus::NeedsFixes.is_healthy());
        assert!(!ValidationStatus::Failed.is_healthy());
    }

    #[test]
    fn test_summary_accumulation() {
        let mut summary = RepairSummary::default();
        summary.add_outcome(&RepairOutcome::Fixed);
        summary.add_outcome(&RepairOutcome::NoChange);
        summary.add_outcome(&RepairOutcome::Skipped {
            reason: "dry run".into(),
        });
        assert!(summary.is_success());
        assert_eq!(summary.total(), 3);

        summary.add_outcome(&RepairOutcome::Failed {
            error: "chown failed".into(),
        });
        assert!(!summary.is_success());
        assert_eq!(summary.total(), 4);
    }
}

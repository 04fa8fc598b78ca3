//! Repair actions and plans.
//!
//! The reconciliation engine maps each finding category to exactly one of
//! these actions. Plans deduplicate, so ten missing subtree entries still
//! produce one layout action and three down services one restart.

use serde::{Deserialize, Serialize};

/// A concrete, typed repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairAction {
    /// Create the tenant system user.
    CreateUser {
        user: String,
        uid: u32,
        gid: u32,
        home: String,
        shell: String,
    },
    /// Create the directory layout (idempotent mkdir -p of every path).
    CreateLayout {
        paths: Vec<String>,
    },
    /// Write the application-runtime pool file and reload its service.
    WritePoolFile {
        path: String,
        content: String,
        service: String,
    },
    /// Write the web-server site file and reload its service.
    WriteSiteFile {
        path: String,
        content: String,
        service: String,
    },
    /// Chown a tree to the given identity.
    ApplyOwnership {
        path: String,
        user: String,
        group: String,
    },
    /// Chmod a directory to the given octal mode.
    ApplyPermissions {
        path: String,
        mode: String,
    },
    /// Restart the listed services.
    RestartServices {
        services: Vec<String>,
    },
    /// Rewrite fields of the stored record (the host won the trust
    /// decision, or a web-group correction).
    UpdateRecord {
        fields: Vec<(String, String)>,
    },
    /// Regenerate the stored record in full, preserving credential fields.
    RegenerateRecord,
}

impl RepairAction {
    /// Short label for plans and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "create-user",
            Self::CreateLayout { .. } => "create-layout",
            Self::WritePoolFile { .. } => "write-pool-file",
            Self::WriteSiteFile { .. } => "write-site-file",
            Self::ApplyOwnership { .. } => "apply-ownership",
            Self::ApplyPermissions { .. } => "apply-permissions",
            Self::RestartServices { .. } => "restart-services",
            Self::UpdateRecord { .. } => "update-record",
            Self::RegenerateRecord => "regenerate-record",
        }
    }

    /// Whether this action mutates the remote host (as opposed to the
    /// stored record).
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::UpdateRecord { .. } | Self::RegenerateRecord)
    }
}

/// An action with the finding that motivated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: RepairAction,
    /// Label of the finding this repairs.
    pub reason: String,
}

/// An ordered, deduplicated list of repairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairPlan {
    pub actions: Vec<PlannedAction>,
}

impl RepairPlan {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action unless an identical one is already planned.
    pub fn push(&mut self, action: RepairAction, reason: impl Into<String>) {
        if self.actions.iter().any(|p| p.action == action) {
            return;
        }
        self.actions.push(PlannedAction {
            action,
            reason: reason.into(),
        });
    }

    /// Whether the plan is empty (the tenant is converged).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of planned actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Labels of every planned action, in order.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.actions.iter().map(|p| p.action.label()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_deduplicates_identical_actions() {
        let mut plan = RepairPlan::new();
        let restart = RepairAction::RestartServices {
            services: vec!["nginx".into()],
        };
        plan.push(restart.clone(), "service-down");
        plan.push(restart, "service-down");
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_plan_keeps_distinct_actions() {
        let mut plan = RepairPlan::new();
        plan.push(
            RepairAction::ApplyPermissions {
                path: "/home/u1001/web".into(),
                mode: "751".into(),
            },
            "permissions-wrong",
        );
        plan.push(
            RepairAction::ApplyPermissions {
                path: "/home/u1001/web/log".into(),
                mode: "750".into(),
            },
            "permissions-wrong",
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.labels(), vec!["apply-permissions", "apply-permissions"]);
    }

    #[test]
    fn test_remote_vs_record_actions() {
        assert!(
            RepairAction::CreateUser {
                user: "u1001".into(),
                uid: 1001,
                gid: 1001,
                home: "/home/u1001".into(),
                shell: "/bin/bash".into(),
            }
            .is_remote()
        );
        assert!(
            !RepairAction::UpdateRecord {
                fields: vec![("UUSER".into(), "u1003".into())],
            }
            .is_remote()
        );
        assert!(!RepairAction::RegenerateRecord.is_remote());
    }
}

//! The closed set of drift finding categories.
//!
//! Every category carries the data its repair needs, so the engine never
//! re-parses free-text messages to decide what to do.

use crate::strategy::OwnershipEvidence;
use serde::{Deserialize, Serialize};

/// A classified discrepancy between the stored Desired Configuration and
/// live remote state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingCategory {
    /// Stored identity and actual base-directory owner disagree. Which side
    /// is right is a trust decision, not a validation one.
    IdentityMismatch {
        evidence: OwnershipEvidence,
    },
    /// Stored web group and actual group owner of the base directory
    /// disagree.
    WebGroupMismatch {
        expected: String,
        actual: String,
    },
    /// The configured user does not exist on the host.
    UserMissing {
        user: String,
        uid: u32,
    },
    /// The configured user exists with the wrong UID.
    UidMismatch {
        user: String,
        expected: u32,
        actual: u32,
    },
    /// Neither the user nor the base directory exist: no remote footprint.
    NoFootprint,
    /// A required directory (base/web/mail) is missing.
    DirectoryMissing {
        path: String,
    },
    /// A web-centric subtree entry (app, log, run, app/public) is missing.
    SubtreeMissing {
        path: String,
    },
    /// The application-runtime pool file is missing.
    PoolFileMissing {
        path: String,
    },
    /// The web-server site file is missing.
    SiteFileMissing {
        path: String,
    },
    /// The stored record has implausibly few keys.
    SparseRecord {
        keys: usize,
        minimum: usize,
    },
    /// A required service is not active.
    ServiceDown {
        service: String,
    },
    /// A directory has the wrong octal mode.
    PermissionsWrong {
        path: String,
        expected: String,
        actual: String,
    },
}

impl FindingCategory {
    /// Short stable label for logs, plans, and persisted snapshots.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::IdentityMismatch { .. } => "identity-mismatch",
            Self::WebGroupMismatch { .. } => "web-group-mismatch",
            Self::UserMissing { .. } => "user-missing",
            Self::UidMismatch { .. } => "uid-mismatch",
            Self::NoFootprint => "no-footprint",
            Self::DirectoryMissing { .. } => "directory-missing",
            Self::SubtreeMissing { .. } => "subtree-missing",
            Self::PoolFileMissing { .. } => "pool-file-missing",
            Self::SiteFileMissing { .. } => "site-file-missing",
            Self::SparseRecord { .. } => "sparse-record",
            Self::ServiceDown { .. } => "service-down",
            Self::PermissionsWrong { .. } => "permissions-wrong",
        }
    }
}

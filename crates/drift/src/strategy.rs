//! The bidirectional trust decision.
//!
//! Both the stored record and the host are independently mutable outside
//! the reconciliation engine (manual admin intervention is common), so when
//! they disagree about a tenant's identity, the engine must decide which
//! side is operationally live rather than blindly overwrite. That decision
//! is a product policy, isolated here behind a named trait so it can be
//! tested without a transport.

use serde::{Deserialize, Serialize};

/// A system user discovered on the host that follows the tenant naming
/// scheme (`u<uid>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Everything the consistency check learned about who owns the tenant's
/// base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipEvidence {
    /// Identity the stored record claims.
    pub record_user: String,
    /// UID the stored record claims.
    pub record_uid: u32,
    /// UID actually owning the base directory, if it exists.
    pub owner_uid: Option<u32>,
    /// Resolved name of that owner, if any.
    pub owner_name: Option<String>,
    /// A tenant-scheme user found on the host, if any.
    pub tenant_user: Option<TenantUser>,
}

/// Which side to converge toward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustDecision {
    /// The host's tenant user is live and owns the tree: rewrite the stored
    /// record to match it.
    TrustHost { user: String, uid: u32, gid: u32 },
    /// A tenant user exists but does not own the tree: rewrite the record
    /// to it *and* chown the tree to it.
    AdoptTenantUser { user: String, uid: u32, gid: u32 },
    /// No better evidence exists: the stored record wins, chown the host.
    TrustRecord,
}

/// Policy for resolving identity drift between record and host.
pub trait TrustStrategy: Send + Sync {
    /// Decide which side to converge toward.
    fn decide(&self, evidence: &OwnershipEvidence) -> TrustDecision;

    /// Policy name for logs and dry-run plans.
    fn name(&self) -> &'static str;
}

/// Default policy: a tenant-scheme user on the host is the strongest
/// evidence of what is operationally live.
///
/// - Tenant user exists and owns the directory: trust the host.
/// - Tenant user exists but a third party owns the directory (record, host
///   owner, and tenant user all disagree): the tenant user still wins; the
///   record is rewritten to it and the tree chowned to it.
/// - No tenant user: the stored record wins.
pub struct PreferTenantUser;

impl TrustStrategy for PreferTenantUser {
    fn decide(&self, evidence: &OwnershipEvidence) -> TrustDecision {
        match &evidence.tenant_user {
            Some(user) if evidence.owner_uid == Some(user.uid) => TrustDecision::TrustHost {
                user: user.name.clone(),
                uid: user.uid,
                gid: user.gid,
            },
            Some(user) => TrustDecision::AdoptTenantUser {
                user: user.name.clone(),
                uid: user.uid,
                gid: user.gid,
            },
            None => TrustDecision::TrustRecord,
        }
    }

    fn name(&self) -> &'static str {
        "prefer-tenant-user"
    }
}

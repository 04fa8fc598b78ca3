//! The reconciliation engine: findings in, convergence out.
//!
//! Each finding category maps to exactly one repair action; identity drift
//! goes through the trust strategy to decide which direction to converge.
//! Execution is sequential and never transactional: every action's outcome
//! is recorded independently, the overall result is success only if none
//! failed, and a partial failure leaves a valid (if incompletely repaired)
//! state. Stored-record writes happen only after their action succeeds.

use anyhow::Result;
use drift::{
    FindingCategory, OwnershipEvidence, PlannedAction, RepairAction, RepairOutcome, RepairPlan,
    RepairSummary, TenantUser, TrustDecision, TrustStrategy, ValidationReport,
};
use sshkit::{ExecOptions, Runner, Script};

use crate::cancel::CancelToken;
use crate::desired::DesiredConfig;
use crate::store::{NodeRecord, Store, Tenant};
use crate::{artifacts, generator, scripts};

/// Builds and executes repair plans for one tenant at a time.
pub struct Reconciler<'a> {
    runner: &'a dyn Runner,
    strategy: &'a dyn TrustStrategy,
}

impl<'a> Reconciler<'a> {
    /// Create an engine over a transport and a trust policy.
    pub fn new(runner: &'a dyn Runner, strategy: &'a dyn TrustStrategy) -> Self {
        Self { runner, strategy }
    }

    /// Map a validation report to its repair plan. Pure; dry-run callers
    /// show this without executing.
    ///
    /// Findings are collected first and the plan is assembled in
    /// dependency order: the user must exist before the layout is created,
    /// the layout before files land in it, and ownership/permission fixes
    /// run after everything they cover exists.
    #[must_use]
    pub fn plan(&self, config: &DesiredConfig, report: &ValidationReport) -> RepairPlan {
        let mut need_user = false;
        let mut need_layout = false;
        let mut need_pool = false;
        let mut need_site = false;
        let mut regenerate = false;
        let mut record_updates: Vec<(RepairAction, &'static str)> = Vec::new();
        let mut ownerships: Vec<(RepairAction, &'static str)> = Vec::new();
        let mut permissions: Vec<(RepairAction, &'static str)> = Vec::new();
        let mut down_services: Vec<String> = Vec::new();

        for finding in report.actionable() {
            let label = finding.category.label();
            match &finding.category {
                FindingCategory::NoFootprint => {
                    need_user = true;
                    need_layout = true;
                    need_pool = true;
                    need_site = true;
                    ownerships.push((ownership_action(config, config.user()), label));
                }
                FindingCategory::UserMissing { .. } => need_user = true,
                FindingCategory::IdentityMismatch { evidence } => {
                    self.collect_trust_actions(
                        config,
                        evidence,
                        &mut record_updates,
                        &mut ownerships,
                    );
                }
                FindingCategory::UidMismatch {
                    user,
                    expected,
                    actual,
                } => {
                    // The existing user itself is the strongest
                    // tenant-user evidence.
                    let evidence = OwnershipEvidence {
                        record_user: user.clone(),
                        record_uid: *expected,
                        owner_uid: None,
                        owner_name: None,
                        tenant_user: Some(TenantUser {
                            name: user.clone(),
                            uid: *actual,
                            gid: *actual,
                        }),
                    };
                    self.collect_trust_actions(
                        config,
                        &evidence,
                        &mut record_updates,
                        &mut ownerships,
                    );
                }
                FindingCategory::DirectoryMissing { .. }
                | FindingCategory::SubtreeMissing { .. } => need_layout = true,
                FindingCategory::PoolFileMissing { .. } => need_pool = true,
                FindingCategory::SiteFileMissing { .. } => need_site = true,
                FindingCategory::SparseRecord { .. } => regenerate = true,
                FindingCategory::WebGroupMismatch { actual, .. } => {
                    record_updates.push((
                        RepairAction::UpdateRecord {
                            fields: vec![("WEB_GROUP".to_string(), actual.clone())],
                        },
                        label,
                    ));
                }
                FindingCategory::ServiceDown { service } => {
                    if !down_services.contains(service) {
                        down_services.push(service.clone());
                    }
                }
                FindingCategory::PermissionsWrong { path, expected, .. } => {
                    permissions.push((
                        RepairAction::ApplyPermissions {
                            path: path.clone(),
                            mode: expected.clone(),
                        },
                        label,
                    ));
                }
            }
        }

        let mut plan = RepairPlan::new();
        if need_user {
            plan.push(create_user_action(config), "user-missing");
        }
        if need_layout {
            plan.push(
                RepairAction::CreateLayout {
                    paths: layout_paths(config),
                },
                "missing-layout",
            );
        }
        if need_pool {
            plan.push(write_pool_action(config), "pool-file-missing");
        }
        if need_site {
            plan.push(write_site_action(config), "site-file-missing");
        }
        for (action, reason) in record_updates {
            plan.push(action, reason);
        }
        if regenerate {
            plan.push(RepairAction::RegenerateRecord, "sparse-record");
        }
        for (action, reason) in ownerships {
            plan.push(action, reason);
        }
        for (action, reason) in permissions {
            plan.push(action, reason);
        }
        if !down_services.is_empty() {
            plan.push(
                RepairAction::RestartServices {
                    services: down_services,
                },
                "service-down",
            );
        }
        plan
    }

    /// The bidirectional branch: the trust strategy decides which side to
    /// converge toward.
    fn collect_trust_actions(
        &self,
        config: &DesiredConfig,
        evidence: &OwnershipEvidence,
        record_updates: &mut Vec<(RepairAction, &'static str)>,
        ownerships: &mut Vec<(RepairAction, &'static str)>,
    ) {
        log::debug!(
            "identity drift on {}: applying {} policy",
            config.get_or_empty("DOMAIN"),
            self.strategy.name()
        );
        match self.strategy.decide(evidence) {
            TrustDecision::TrustHost { user, uid, gid } => {
                record_updates.push((
                    RepairAction::UpdateRecord {
                        fields: record_identity_fields(&user, uid, gid),
                    },
                    "identity-mismatch",
                ));
            }
            TrustDecision::AdoptTenantUser { user, uid, gid } => {
                record_updates.push((
                    RepairAction::UpdateRecord {
                        fields: record_identity_fields(&user, uid, gid),
                    },
                    "identity-mismatch",
                ));
                ownerships.push((ownership_action(config, &user), "identity-mismatch"));
            }
            TrustDecision::TrustRecord => {
                ownerships.push((ownership_action(config, config.user()), "identity-mismatch"));
            }
        }
    }

    /// Execute a plan sequentially, recording each outcome.
    ///
    /// The cancel token is checked between actions, never mid-action. A
    /// transport-level failure skips the remaining actions (the host is
    /// unreachable); ordinary command failures do not.
    pub fn execute(
        &self,
        store: &Store,
        tenant: &mut Tenant,
        node: &NodeRecord,
        plan: &RepairPlan,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<(RepairSummary, Vec<(PlannedAction, RepairOutcome)>)> {
        let mut summary = RepairSummary::default();
        let mut outcomes = Vec::with_capacity(plan.len());
        let mut transport_down = false;

        for planned in &plan.actions {
            let outcome = if dry_run {
                RepairOutcome::Skipped {
                    reason: "dry run".to_string(),
                }
            } else if cancel.is_cancelled() {
                RepairOutcome::Skipped {
                    reason: "cancelled".to_string(),
                }
            } else if transport_down {
                RepairOutcome::Skipped {
                    reason: "transport failure".to_string(),
                }
            } else {
                match self.apply(store, tenant, node, &planned.action) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        transport_down = true;
                        RepairOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };
            log::info!(
                "repair {} on {}: {:?}",
                planned.action.label(),
                tenant.domain,
                outcome
            );
            summary.add_outcome(&outcome);
            outcomes.push((planned.clone(), outcome));
        }
        Ok((summary, outcomes))
    }

    /// Apply one action. `Err` means the transport itself failed; command
    /// failures are `Ok(Failed { .. })`.
    fn apply(
        &self,
        store: &Store,
        tenant: &mut Tenant,
        node: &NodeRecord,
        action: &RepairAction,
    ) -> sshkit::Result<RepairOutcome> {
        match action {
            RepairAction::CreateUser {
                user,
                uid,
                gid,
                home,
                shell,
            } => self.run_remote(node, scripts::create_user(user, *uid, *gid, home, shell)),
            RepairAction::CreateLayout { paths } => {
                self.run_remote(node, scripts::create_layout(paths))
            }
            RepairAction::WritePoolFile {
                path,
                content,
                service,
            }
            | RepairAction::WriteSiteFile {
                path,
                content,
                service,
            } => {
                let outcome = self.run_remote(node, scripts::write_file(path, content))?;
                if !outcome.is_success() {
                    return Ok(outcome);
                }
                self.run_remote(node, scripts::reload_services(std::slice::from_ref(service)))
            }
            RepairAction::ApplyOwnership { path, user, group } => {
                self.run_remote(node, scripts::chown_tree(path, user, group))
            }
            RepairAction::ApplyPermissions { path, mode } => {
                self.run_remote(node, scripts::chmod_dir(path, mode))
            }
            RepairAction::RestartServices { services } => {
                self.run_remote(node, scripts::restart_services(services))
            }
            RepairAction::UpdateRecord { fields } => {
                for (key, value) in fields {
                    tenant.config.set(key, value);
                }
                Ok(save_outcome(store, tenant))
            }
            RepairAction::RegenerateRecord => Ok(self.regenerate_record(store, tenant, node)),
        }
    }

    fn run_remote(&self, node: &NodeRecord, script: Script) -> sshkit::Result<RepairOutcome> {
        let opts = ExecOptions::live().privileged();
        match self.runner.run(&node.target(), &script, &opts) {
            Ok(output) if output.success => Ok(RepairOutcome::Fixed),
            Ok(output) => Ok(RepairOutcome::Failed {
                error: format!(
                    "exit {}: {}",
                    output.exit_code,
                    first_line(&output.stderr, &output.stdout)
                ),
            }),
            Err(e) => Err(e),
        }
    }

    /// Regenerate the stored record deterministically, preserving identity
    /// and credential fields so running services keep authenticating.
    fn regenerate_record(
        &self,
        store: &Store,
        tenant: &mut Tenant,
        node: &NodeRecord,
    ) -> RepairOutcome {
        let mut overrides = tenant.config.credentials();
        for key in ["UUSER", "U_UID", "U_GID"] {
            if let Some(value) = tenant.config.get(key) {
                overrides.insert(key.to_string(), value.to_string());
            }
        }
        let domain = tenant.domain.clone();
        let req = generator::GenerateRequest {
            node,
            domain: &domain,
            overrides: &overrides,
            os_hint: node.os.as_ref(),
            existing_uids: None,
        };
        tenant.config = generator::generate(&req, &mut rand::rngs::OsRng);
        save_outcome(store, tenant)
    }
}

fn save_outcome(store: &Store, tenant: &mut Tenant) -> RepairOutcome {
    match store.save_tenant(tenant) {
        Ok(()) => RepairOutcome::Fixed,
        Err(e) => RepairOutcome::Failed {
            error: format!("record write failed: {e:#}"),
        },
    }
}

fn record_identity_fields(user: &str, uid: u32, gid: u32) -> Vec<(String, String)> {
    vec![
        ("UUSER".to_string(), user.to_string()),
        ("U_UID".to_string(), uid.to_string()),
        ("U_GID".to_string(), gid.to_string()),
    ]
}

fn create_user_action(config: &DesiredConfig) -> RepairAction {
    RepairAction::CreateUser {
        user: config.user().to_string(),
        uid: config.uid().unwrap_or_default(),
        gid: config
            .gid()
            .unwrap_or_else(|| config.uid().unwrap_or_default()),
        home: config.base_path().to_string(),
        shell: config.get_or_empty("U_SHELL").to_string(),
    }
}

fn write_pool_action(config: &DesiredConfig) -> RepairAction {
    RepairAction::WritePoolFile {
        path: config.get_or_empty("PHP_POOL_FILE").to_string(),
        content: artifacts::pool_file(config),
        service: config.get_or_empty("PHP_FPM_SERVICE").to_string(),
    }
}

fn write_site_action(config: &DesiredConfig) -> RepairAction {
    RepairAction::WriteSiteFile {
        path: config.get_or_empty("WEB_SITE_FILE").to_string(),
        content: artifacts::site_file(config),
        service: config.get_or_empty("WEB_SERVICE").to_string(),
    }
}

fn ownership_action(config: &DesiredConfig, user: &str) -> RepairAction {
    RepairAction::ApplyOwnership {
        path: config.base_path().to_string(),
        user: user.to_string(),
        group: user.to_string(),
    }
}

/// Every directory the current layout expects, parents first.
fn layout_paths(config: &DesiredConfig) -> Vec<String> {
    vec![
        config.base_path().to_string(),
        config.web_path().to_string(),
        config.mail_path().to_string(),
        config.get_or_empty("U_APP_PATH").to_string(),
        config.get_or_empty("U_PUBLIC_PATH").to_string(),
        config.get_or_empty("U_LOG_PATH").to_string(),
        config.get_or_empty("U_RUN_PATH").to_string(),
    ]
}

fn first_line<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let err = stderr.trim();
    if err.is_empty() {
        stdout.trim().lines().next().unwrap_or("")
    } else {
        err.lines().next().unwrap_or("")
    }
}

//! The drift validator: a fixed, ordered battery of checks comparing one
//! tenant's Desired Configuration against live remote state.
//!
//! Every check is one transport round-trip and classifies independently;
//! a non-zero remote exit is a signal ("absent", "inactive"), never an
//! error. Only transport-level failures abort the run. The report is a
//! cache: callers re-probe by re-running, never by trusting a snapshot.

use anyhow::{Context, Result};
use drift::{
    Finding, FindingCategory, OwnershipEvidence, Severity, TenantUser, ValidationReport,
};
use sshkit::{ExecOptions, ExecOutput, NodeTarget, Runner, Script};

use crate::scripts;
use crate::store::{NodeRecord, Tenant};

/// Subtree entries under the web directory expected by the current layout.
const WEB_SUBTREE: [&str; 4] = ["app", "log", "run", "app/public"];

/// Run the full battery against one tenant.
pub fn validate(runner: &dyn Runner, node: &NodeRecord, tenant: &Tenant) -> Result<ValidationReport> {
    let probe = Probe {
        runner,
        target: node.target(),
    };
    let config = &tenant.config;
    let mut report = ValidationReport::new();

    // Shared probes: the user entry and the base directory owner feed the
    // consistency check, the identity check, and the footprint escalation.
    let user = config.user();
    let record_uid = config.uid().unwrap_or_default();
    let user_entry = probe
        .capture_ok(scripts::user_entry(user))
        .with_context(|| format!("probing user {user} on {}", node.name))?;
    let remote_user = user_entry.as_deref().and_then(parse_passwd_entry);
    let base = config.base_path();
    let owner = probe
        .capture_ok(scripts::stat_owner(base))
        .with_context(|| format!("probing {base} on {}", node.name))?
        .as_deref()
        .and_then(parse_owner);

    // No remote footprint at all is one critical finding, not a pile of
    // per-directory errors.
    if remote_user.is_none() && owner.is_none() {
        report.add(Finding::new(
            FindingCategory::NoFootprint,
            Severity::Critical,
            format!("{} has no remote footprint on {}: user {user} and {base} both absent",
                tenant.domain, node.name),
        ));
        check_record(config, &mut report);
        check_services(&probe, config, &mut report)?;
        return Ok(report);
    }

    check_consistency(config, record_uid, remote_user.as_ref(), owner.as_ref(), &mut report);
    check_identity(config, record_uid, remote_user.as_ref(), &mut report);
    check_layout(&probe, config, &mut report)?;
    check_service_files(&probe, config, &mut report)?;
    check_record(config, &mut report);
    check_services(&probe, config, &mut report)?;
    check_permissions(&probe, config, &mut report)?;

    Ok(report)
}

/// Check 1: does the persisted identity match the actual owner of the base
/// directory? Either side could be right, so drift here is a warning
/// carrying the evidence the reconciler's trust strategy needs.
fn check_consistency(
    config: &crate::desired::DesiredConfig,
    record_uid: u32,
    remote_user: Option<&PasswdEntry>,
    owner: Option<&DirOwner>,
    report: &mut ValidationReport,
) {
    let Some(owner) = owner else {
        // Base directory missing is the layout check's finding.
        return;
    };

    let user = config.user();
    if owner.user == user && owner.uid == record_uid {
        report.add(Finding::new(
            FindingCategory::IdentityMismatch {
                evidence: OwnershipEvidence {
                    record_user: user.to_string(),
                    record_uid,
                    owner_uid: Some(owner.uid),
                    owner_name: Some(owner.user.clone()),
                    tenant_user: None,
                },
            },
            Severity::Passed,
            format!("{} owned by {user} ({record_uid}) as recorded", config.base_path()),
        ));
    } else {
        let evidence = OwnershipEvidence {
            record_user: user.to_string(),
            record_uid,
            owner_uid: Some(owner.uid),
            owner_name: Some(owner.user.clone()),
            tenant_user: discover_tenant_user(remote_user, owner),
        };
        report.add(
            Finding::new(
                FindingCategory::IdentityMismatch { evidence },
                Severity::Warning,
                format!(
                    "{} is owned by {} ({}) but the record says {user} ({record_uid})",
                    config.base_path(),
                    owner.user,
                    owner.uid
                ),
            )
            .expected(format!("{user}:{record_uid}"))
            .actual(format!("{}:{}", owner.user, owner.uid)),
        );
    }

    let web_group = config.web_group();
    if !web_group.is_empty() && owner.group != web_group && owner.group != user {
        report.add(
            Finding::new(
                FindingCategory::WebGroupMismatch {
                    expected: web_group.to_string(),
                    actual: owner.group.clone(),
                },
                Severity::Warning,
                format!(
                    "{} group is {} but the record says {web_group}",
                    config.base_path(),
                    owner.group
                ),
            )
            .expected(web_group)
            .actual(&owner.group),
        );
    }
}

/// Check 2: does the configured user exist remotely with the configured
/// UID? Missing or wrong is an error.
fn check_identity(
    config: &crate::desired::DesiredConfig,
    record_uid: u32,
    remote_user: Option<&PasswdEntry>,
    report: &mut ValidationReport,
) {
    let user = config.user();
    match remote_user {
        None => report.add(
            Finding::new(
                FindingCategory::UserMissing {
                    user: user.to_string(),
                    uid: record_uid,
                },
                Severity::Error,
                format!("user {user} does not exist"),
            )
            .expected(format!("uid {record_uid}"))
            .actual("absent"),
        ),
        Some(entry) if entry.uid != record_uid => report.add(
            Finding::new(
                FindingCategory::UidMismatch {
                    user: user.to_string(),
                    expected: record_uid,
                    actual: entry.uid,
                },
                Severity::Error,
                format!("user {user} has uid {} but the record says {record_uid}", entry.uid),
            )
            .expected(record_uid.to_string())
            .actual(entry.uid.to_string()),
        ),
        Some(entry) => report.add(Finding::new(
            FindingCategory::UserMissing {
                user: user.to_string(),
                uid: record_uid,
            },
            Severity::Passed,
            format!("user {user} exists with uid {}", entry.uid),
        )),
    }
}

/// Check 3: base/web/mail directories (errors) and the web-centric subtree
/// (warnings).
fn check_layout(
    probe: &Probe<'_>,
    config: &crate::desired::DesiredConfig,
    report: &mut ValidationReport,
) -> Result<()> {
    for path in [config.base_path(), config.web_path(), config.mail_path()] {
        if probe.success(scripts::dir_exists(path))? {
            report.add(Finding::new(
                FindingCategory::DirectoryMissing {
                    path: path.to_string(),
                },
                Severity::Passed,
                format!("{path} exists"),
            ));
        } else {
            report.add(
                Finding::new(
                    FindingCategory::DirectoryMissing {
                        path: path.to_string(),
                    },
                    Severity::Error,
                    format!("{path} is missing"),
                )
                .expected("directory")
                .actual("absent"),
            );
        }
    }

    for entry in WEB_SUBTREE {
        let path = format!("{}/{entry}", config.web_path());
        if probe.success(scripts::dir_exists(&path))? {
            report.add(Finding::new(
                FindingCategory::SubtreeMissing { path: path.clone() },
                Severity::Passed,
                format!("{path} exists"),
            ));
        } else {
            report.add(
                Finding::new(
                    FindingCategory::SubtreeMissing { path: path.clone() },
                    Severity::Warning,
                    format!("{path} is missing"),
                )
                .expected("directory")
                .actual("absent"),
            );
        }
    }
    Ok(())
}

/// Check 4: the pool file (error) and the site file (warning — the web
/// server may be configured another way).
fn check_service_files(
    probe: &Probe<'_>,
    config: &crate::desired::DesiredConfig,
    report: &mut ValidationReport,
) -> Result<()> {
    let pool = config.get_or_empty("PHP_POOL_FILE");
    if probe.success(scripts::file_exists(pool))? {
        report.add(Finding::new(
            FindingCategory::PoolFileMissing {
                path: pool.to_string(),
            },
            Severity::Passed,
            format!("{pool} exists"),
        ));
    } else {
        report.add(
            Finding::new(
                FindingCategory::PoolFileMissing {
                    path: pool.to_string(),
                },
                Severity::Error,
                format!("pool file {pool} is missing"),
            )
            .expected("file")
            .actual("absent"),
        );
    }

    let site = config.get_or_empty("WEB_SITE_FILE");
    if probe.success(scripts::file_exists(site))? {
        report.add(Finding::new(
            FindingCategory::SiteFileMissing {
                path: site.to_string(),
            },
            Severity::Passed,
            format!("{site} exists"),
        ));
    } else {
        report.add(
            Finding::new(
                FindingCategory::SiteFileMissing {
                    path: site.to_string(),
                },
                Severity::Warning,
                format!("site file {site} is missing"),
            )
            .expected("file")
            .actual("absent"),
        );
    }
    Ok(())
}

/// Check 5: stored-record completeness.
fn check_record(config: &crate::desired::DesiredConfig, report: &mut ValidationReport) {
    let keys = config.len();
    let minimum = crate::desired::MIN_KEYS;
    if keys < minimum {
        report.add(
            Finding::new(
                FindingCategory::SparseRecord { keys, minimum },
                Severity::Warning,
                format!("stored record has {keys} keys, expected at least {minimum}"),
            )
            .expected(format!(">= {minimum}"))
            .actual(keys.to_string()),
        );
    } else {
        report.add(Finding::new(
            FindingCategory::SparseRecord { keys, minimum },
            Severity::Passed,
            format!("stored record has {keys} keys"),
        ));
    }
}

/// Check 6: service health. Mail only applies to tenants that host mail;
/// the node's own admin identity does not.
fn check_services(
    probe: &Probe<'_>,
    config: &crate::desired::DesiredConfig,
    report: &mut ValidationReport,
) -> Result<()> {
    let mut services = vec![
        config.get_or_empty("WEB_SERVICE"),
        config.get_or_empty("PHP_FPM_SERVICE"),
    ];
    if !config.is_admin() {
        services.push(config.get_or_empty("MAIL_SERVICE"));
    }

    for service in services {
        if service.is_empty() {
            continue;
        }
        if probe.success(scripts::service_active(service))? {
            report.add(Finding::new(
                FindingCategory::ServiceDown {
                    service: service.to_string(),
                },
                Severity::Passed,
                format!("{service} is active"),
            ));
        } else {
            report.add(
                Finding::new(
                    FindingCategory::ServiceDown {
                        service: service.to_string(),
                    },
                    Severity::Warning,
                    format!("{service} is not active"),
                )
                .expected("active")
                .actual("inactive"),
            );
        }
    }
    Ok(())
}

/// Check 7: octal modes of the web and log directories.
fn check_permissions(
    probe: &Probe<'_>,
    config: &crate::desired::DesiredConfig,
    report: &mut ValidationReport,
) -> Result<()> {
    let expectations = [
        (config.web_path().to_string(), config.get_or_empty("WEB_DIR_MODE")),
        (
            config.get_or_empty("U_LOG_PATH").to_string(),
            config.get_or_empty("LOG_DIR_MODE"),
        ),
    ];

    for (path, expected) in expectations {
        if expected.is_empty() {
            continue;
        }
        let Some(actual) = probe.capture_ok(scripts::stat_mode(&path))? else {
            // Missing directory is the layout check's finding.
            continue;
        };
        let actual = actual.trim().to_string();
        if actual == expected {
            report.add(Finding::new(
                FindingCategory::PermissionsWrong {
                    path: path.clone(),
                    expected: expected.to_string(),
                    actual: actual.clone(),
                },
                Severity::Passed,
                format!("{path} has mode {actual}"),
            ));
        } else {
            report.add(
                Finding::new(
                    FindingCategory::PermissionsWrong {
                        path: path.clone(),
                        expected: expected.to_string(),
                        actual: actual.clone(),
                    },
                    Severity::Warning,
                    format!("{path} has mode {actual}, expected {expected}"),
                )
                .expected(expected)
                .actual(actual),
            );
        }
    }
    Ok(())
}

// ============================================================================
// Probe plumbing
// ============================================================================

struct Probe<'a> {
    runner: &'a dyn Runner,
    target: NodeTarget,
}

impl Probe<'_> {
    fn output(&self, script: Script) -> sshkit::Result<ExecOutput> {
        self.runner.run(&self.target, &script, &ExecOptions::live())
    }

    /// Zero exit means yes.
    fn success(&self, script: Script) -> sshkit::Result<bool> {
        Ok(self.output(script)?.success)
    }

    /// Stdout on zero exit, `None` on non-zero (absent/inactive).
    fn capture_ok(&self, script: Script) -> sshkit::Result<Option<String>> {
        let output = self.output(script)?;
        if output.success {
            Ok(Some(output.stdout_trimmed().to_string()))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug, Clone)]
struct PasswdEntry {
    uid: u32,
    gid: u32,
}

/// Parse `name:x:uid:gid:...`.
fn parse_passwd_entry(line: &str) -> Option<PasswdEntry> {
    let mut fields = line.trim().split(':');
    let _name = fields.next()?;
    let _pw = fields.next()?;
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    Some(PasswdEntry { uid, gid })
}

#[derive(Debug, Clone)]
struct DirOwner {
    uid: u32,
    gid: u32,
    user: String,
    group: String,
}

/// Parse `uid gid user group` from the owner probe.
fn parse_owner(line: &str) -> Option<DirOwner> {
    let mut fields = line.trim().split_whitespace();
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let user = fields.next()?.to_string();
    let group = fields.next()?.to_string();
    Some(DirOwner {
        uid,
        gid,
        user,
        group,
    })
}

/// A tenant-scheme user (`u<digits>`) visible in the evidence: either the
/// directory's owner itself, or the record's user found under a different
/// UID.
fn discover_tenant_user(
    remote_user: Option<&PasswdEntry>,
    owner: &DirOwner,
) -> Option<TenantUser> {
    if is_tenant_scheme(&owner.user) {
        return Some(TenantUser {
            name: owner.user.clone(),
            uid: owner.uid,
            gid: owner.gid,
        });
    }
    remote_user.map(|entry| TenantUser {
        name: format!("u{}", entry.uid),
        uid: entry.uid,
        gid: entry.gid,
    })
}

fn is_tenant_scheme(name: &str) -> bool {
    name.strip_prefix('u')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::FakeRunner;
    use crate::store::{NodeRecord, Tenant};
    use drift::ValidationStatus;
    use std::collections::BTreeMap;

    fn node() -> NodeRecord {
        NodeRecord {
            name: "node-a".into(),
            group: "fleet".into(),
            hostname: "10.0.0.5".into(),
            ssh_user: "ops".into(),
            ssh_port: 22,
            fqdn: "node-a.fleet.example".into(),
            os: None,
        }
    }

    fn tenant() -> Tenant {
        let node = node();
        let mut tenant = Tenant::new("mail.example.com", "fleet", "node-a");
        let req = crate::generator::GenerateRequest {
            node: &node,
            domain: "mail.example.com",
            overrides: &BTreeMap::new(),
            os_hint: None,
            existing_uids: Some(&[]),
        };
        use rand::SeedableRng;
        tenant.config =
            crate::generator::generate(&req, &mut rand::rngs::StdRng::seed_from_u64(1));
        tenant
    }

    /// A runner where the tenant is fully converged.
    fn healthy_runner() -> FakeRunner {
        crate::harness::converged_runner(&tenant().config)
    }

    #[test]
    fn test_converged_tenant_passes() {
        let report = validate(&healthy_runner(), &node(), &tenant()).unwrap();
        assert_eq!(report.status(), ValidationStatus::Passed, "{report:?}");
        assert!(report.warnings.is_empty());
        assert!(report.issues.is_empty());
        assert!(!report.passed.is_empty());
    }

    #[test]
    fn test_no_footprint_is_critical() {
        // Nothing exists remotely: every probe fails.
        let runner = FakeRunner::new();
        let report = validate(&runner, &node(), &tenant()).unwrap();
        assert_eq!(report.status(), ValidationStatus::Failed);
        assert!(report.has_critical());
        assert!(
            report
                .issues
                .iter()
                .any(|f| f.category == FindingCategory::NoFootprint)
        );
    }

    #[test]
    fn test_missing_pool_file_needs_fixes() {
        let runner = healthy_runner();
        runner.fail("test -f", "pool.d/mail.example.com.conf", 1);
        let report = validate(&runner, &node(), &tenant()).unwrap();
        assert_eq!(report.status(), ValidationStatus::NeedsFixes);
        assert!(
            report
                .issues
                .iter()
                .any(|f| matches!(f.category, FindingCategory::PoolFileMissing { .. }))
        );
    }

    #[test]
    fn test_identity_mismatch_is_warning_with_evidence() {
        let runner = healthy_runner();
        // Directory owned by a different tenant-scheme user.
        runner.ok("stat -c '%u %g %U %G'", "/home/u1001", "1003 1003 u1003 u1003");
        let report = validate(&runner, &node(), &tenant()).unwrap();
        assert_eq!(report.status(), ValidationStatus::PassedWithWarnings);
        let finding = report
            .warnings
            .iter()
            .find(|f| matches!(f.category, FindingCategory::IdentityMismatch { .. }))
            .expect("identity mismatch finding");
        match &finding.category {
            FindingCategory::IdentityMismatch { evidence } => {
                assert_eq!(evidence.owner_uid, Some(1003));
                let tu = evidence.tenant_user.as_ref().expect("tenant user");
                assert_eq!(tu.name, "u1003");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_down_service_is_warning() {
        let runner = healthy_runner();
        runner.fail("systemctl is-active", "postfix", 3);
        let report = validate(&runner, &node(), &tenant()).unwrap();
        assert_eq!(report.status(), ValidationStatus::PassedWithWarnings);
        assert!(
            report
                .warnings
                .iter()
                .any(|f| matches!(&f.category, FindingCategory::ServiceDown { service } if service == "postfix"))
        );
    }

    #[test]
    fn test_wrong_mode_is_warning() {
        let runner = healthy_runner();
        runner.ok("stat -c '%a'", "/home/u1001/web/log", "777");
        let report = validate(&runner, &node(), &tenant()).unwrap();
        assert!(
            report
                .warnings
                .iter()
                .any(|f| matches!(&f.category, FindingCategory::PermissionsWrong { actual, .. } if actual == "777"))
        );
    }

    #[test]
    fn test_sparse_record_is_warning() {
        let runner = FakeRunner::new();
        runner.ok("getent passwd", "u1001", "u1001:x:1001:1001::/home/u1001:/bin/bash");
        runner.ok("stat -c '%u %g %U %G'", "/home/u1001", "1001 1001 u1001 u1001");
        let mut tenant = tenant();
        let mut sparse = crate::desired::DesiredConfig::new();
        for key in ["UUSER", "U_UID", "U_PATH", "DOMAIN"] {
            sparse.set(key, tenant.config.get_or_empty(key).to_string());
        }
        tenant.config = sparse;
        let report = validate(&runner, &node(), &tenant).unwrap();
        assert!(
            report
                .warnings
                .iter()
                .any(|f| matches!(f.category, FindingCategory::SparseRecord { .. }))
        );
    }

    #[test]
    fn test_parse_helpers() {
        let entry = parse_passwd_entry("u1001:x:1001:1001::/home/u1001:/bin/bash").unwrap();
        assert_eq!(entry.uid, 1001);
        let owner = parse_owner("1001 1001 u1001 www-data").unwrap();
        assert_eq!(owner.user, "u1001");
        assert_eq!(owner.group, "www-data");
        assert!(parse_owner("garbage").is_none());
        assert!(is_tenant_scheme("u1001"));
        assert!(!is_tenant_scheme("admin"));
        assert!(!is_tenant_scheme("u"));
    }
}

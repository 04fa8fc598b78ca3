//! The migration orchestrator: legacy layout → web-centric layout.
//!
//! Five sequential steps per tenant — backup, structural transform,
//! permission normalization, service reload, verification — with `failed`
//! reachable from any step. The pre-flight lifecycle check doubles as the
//! exclusivity guard: only `discovered`/`validated` tenants enter, and the
//! status is persisted as `in_progress` before the first remote command,
//! so a second mutating operation cannot join. Verification is the
//! acceptance gate: steps 1-4 succeeding means nothing if the markers are
//! not on disk afterwards.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sshkit::{ExecOptions, Runner, Script};

use crate::cancel::CancelToken;
use crate::desired::DesiredConfig;
use crate::store::{MigrationRecord, NodeRecord, Store, Tenant, TenantStatus};
use crate::{artifacts, scripts};

/// Markers required by the verification gate (out of 4 probed).
const REQUIRED_MARKERS: usize = 3;

/// Errors the orchestrator reports without touching the host.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The lifecycle guard rejected entry.
    #[error(
        "tenant {domain} is {status}; only discovered or validated tenants can be migrated"
    )]
    IneligibleState {
        domain: String,
        status: TenantStatus,
    },

    /// Rollback was requested but no archive is recorded.
    #[error("tenant {domain} has no recorded backup archive to roll back from")]
    NoArchive { domain: String },
}

/// Options for one migration attempt.
#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    /// Skip the backup step. Recorded as a warning in the migration log;
    /// rollback is impossible for this attempt.
    pub skip_backup: bool,
}

/// What one attempt did.
#[derive(Debug)]
pub struct MigrationOutcome {
    /// Whether the tenant reached `migrated`.
    pub migrated: bool,
    /// File moves performed by the structural transform.
    pub moves: u32,
    /// Markers found by verification.
    pub markers: usize,
}

/// The step names recorded in the migration log, in execution order.
pub const STEP_NAMES: [&str; 4] = [
    "backup_created",
    "structurally_migrated",
    "permissions_updated",
    "verified",
];

/// Run one migration attempt against a tenant.
pub fn migrate(
    store: &Store,
    runner: &dyn Runner,
    node: &NodeRecord,
    tenant: &mut Tenant,
    opts: &MigrationOptions,
    cancel: &CancelToken,
) -> Result<MigrationOutcome> {
    // Pre-flight: terminal-state and exclusivity guard.
    if !tenant.status.migration_eligible() {
        bail!(MigrationError::IneligibleState {
            domain: tenant.domain.clone(),
            status: tenant.status,
        });
    }

    tenant.status = TenantStatus::InProgress;
    store.save_tenant(tenant)?;

    let mut record = MigrationRecord {
        started_at: Utc::now(),
        finished_at: None,
        steps_completed: Vec::new(),
        archive_path: None,
        snapshot_checksum: None,
        passed: false,
        warnings: Vec::new(),
        error: None,
    };

    match run_steps(store, runner, node, tenant, opts, cancel, &mut record) {
        Ok(outcome) => {
            record.passed = outcome.migrated;
            record.finished_at = Some(Utc::now());
            if !outcome.migrated {
                tenant.status = TenantStatus::Failed;
            }
            tenant.migration_log.push(record);
            store.save_tenant(tenant)?;
            Ok(outcome)
        }
        Err(e) => {
            // Partial log preserved; status advanced only after recording.
            record.error = Some(format!("{e:#}"));
            record.finished_at = Some(Utc::now());
            tenant.migration_log.push(record);
            tenant.status = TenantStatus::Failed;
            store.save_tenant(tenant)?;
            Err(e)
        }
    }
}

fn run_steps(
    store: &Store,
    runner: &dyn Runner,
    node: &NodeRecord,
    tenant: &mut Tenant,
    opts: &MigrationOptions,
    cancel: &CancelToken,
    record: &mut MigrationRecord,
) -> Result<MigrationOutcome> {
    let config = tenant.config.clone();
    let target = node.target();
    let exec = ExecOptions::live().privileged();

    // Step 1: backup, outside the tenant tree.
    check_cancel(cancel)?;
    if opts.skip_backup {
        log::warn!("backup skipped for {} by explicit opt-out", tenant.domain);
        record
            .warnings
            .push("backup skipped by explicit opt-out".to_string());
    } else {
        let (_, checksum) = store
            .snapshot_tenant(&tenant.key())
            .context("local record snapshot failed")?;
        record.snapshot_checksum = Some(checksum);

        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let archive = artifacts::backup_archive_path(&config, &stamp);
        run_ok(
            runner,
            &target,
            scripts::backup_tree(config.base_path(), &archive),
            &exec,
            "backup",
        )?;
        record.archive_path = Some(archive);
        record.steps_completed.push("backup_created".to_string());
    }
    if tenant.legacy_config.is_none() {
        tenant.legacy_config = Some(config.clone());
    }

    // Step 2: structural transform, guarded on new-layout markers.
    check_cancel(cancel)?;
    let stdout = run_ok(
        runner,
        &target,
        scripts::migrate_layout(config.base_path()),
        &exec,
        "structural transform",
    )?;
    let moves = parse_moves(&stdout);
    record
        .steps_completed
        .push("structurally_migrated".to_string());
    log::info!("{}: structural transform moved {moves} subtrees", tenant.domain);

    // Step 3: permission normalization (the trust-the-record rules).
    check_cancel(cancel)?;
    apply_ownership(runner, &target, &config, &exec)?;
    record
        .steps_completed
        .push("permissions_updated".to_string());

    // Step 4: best-effort service reload.
    check_cancel(cancel)?;
    let services = reload_targets(&config);
    match run_ok(
        runner,
        &target,
        scripts::reload_services(&services),
        &exec,
        "service reload",
    ) {
        Ok(_) => {}
        Err(e) => {
            log::warn!("{}: service reload failed: {e:#}", tenant.domain);
            record.warnings.push(format!("service reload failed: {e}"));
        }
    }

    // Step 5: verification, the acceptance gate.
    check_cancel(cancel)?;
    let stdout = run_ok(
        runner,
        &target,
        scripts::verify_markers(
            config.get_or_empty("U_PUBLIC_PATH"),
            config.get_or_empty("U_LOG_PATH"),
            config.get_or_empty("U_RUN_PATH"),
        ),
        &exec,
        "verification",
    )?;
    let markers = stdout.lines().filter(|l| l.starts_with("MARKER:")).count();

    if markers < REQUIRED_MARKERS {
        record.error = Some(format!(
            "verification found {markers} of 4 markers, need {REQUIRED_MARKERS}"
        ));
        return Ok(MigrationOutcome {
            migrated: false,
            moves,
            markers,
        });
    }

    record.steps_completed.push("verified".to_string());
    tenant.status = TenantStatus::Migrated;
    Ok(MigrationOutcome {
        migrated: true,
        moves,
        markers,
    })
}

/// Restore a tenant from a backup archive.
///
/// Stops services, extracts the archive over the tree, reapplies the
/// ownership rules, restarts services, and returns the tenant to
/// `validated`.
pub fn rollback(
    store: &Store,
    runner: &dyn Runner,
    node: &NodeRecord,
    tenant: &mut Tenant,
    archive: Option<&str>,
    cancel: &CancelToken,
) -> Result<()> {
    let archive = match archive.or_else(|| tenant.latest_archive()) {
        Some(a) => a.to_string(),
        None => bail!(MigrationError::NoArchive {
            domain: tenant.domain.clone(),
        }),
    };

    let config = tenant.config.clone();
    let target = node.target();
    let exec = ExecOptions::live().privileged();
    let services = reload_targets(&config);

    check_cancel(cancel)?;
    run_ok(
        runner,
        &target,
        scripts::stop_services(&services),
        &exec,
        "stopping services",
    )?;

    check_cancel(cancel)?;
    run_ok(
        runner,
        &target,
        scripts::restore_tree(config.base_path(), &archive),
        &exec,
        "restoring archive",
    )?;

    check_cancel(cancel)?;
    apply_ownership(runner, &target, &config, &exec)?;

    check_cancel(cancel)?;
    run_ok(
        runner,
        &target,
        scripts::restart_services(&services),
        &exec,
        "restarting services",
    )?;

    tenant.status = TenantStatus::Validated;
    store.save_tenant(tenant)?;
    log::info!("{} rolled back from {archive}", tenant.domain);
    Ok(())
}

/// Ownership + mode normalization shared by step 3 and rollback.
fn apply_ownership(
    runner: &dyn Runner,
    target: &sshkit::NodeTarget,
    config: &DesiredConfig,
    exec: &ExecOptions,
) -> Result<()> {
    let user = config.user();
    run_ok(
        runner,
        target,
        scripts::chown_tree(config.base_path(), user, user),
        exec,
        "ownership",
    )?;
    run_ok(
        runner,
        target,
        scripts::chmod_dir(config.web_path(), config.get_or_empty("WEB_DIR_MODE")),
        exec,
        "web directory mode",
    )?;
    run_ok(
        runner,
        target,
        scripts::chmod_dir(
            config.get_or_empty("U_LOG_PATH"),
            config.get_or_empty("LOG_DIR_MODE"),
        ),
        exec,
        "log directory mode",
    )?;
    Ok(())
}

fn reload_targets(config: &DesiredConfig) -> Vec<String> {
    vec![
        config.get_or_empty("WEB_SERVICE").to_string(),
        config.get_or_empty("PHP_FPM_SERVICE").to_string(),
    ]
}

fn run_ok(
    runner: &dyn Runner,
    target: &sshkit::NodeTarget,
    script: Script,
    exec: &ExecOptions,
    what: &str,
) -> Result<String> {
    runner
        .run_capture(target, &script, exec)
        .with_context(|| format!("{what} failed on {}", target.name))
}

fn parse_moves(stdout: &str) -> u32 {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("MOVED:"))
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

fn check_cancel(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        bail!("cancelled between steps");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{FakeRunner, run_local};
    use rand::SeedableRng;
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
        tenant.config =
            crate::generator::generate(&req, &mut rand::rngs::StdRng::seed_from_u64(1));
        tenant
    }

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        (dir, store)
    }

    /// A runner where every migration step succeeds.
    fn migration_runner(markers: usize) -> FakeRunner {
        let runner = FakeRunner::new();
        runner.ok("tar -czf", "/home/u1001", "");
        runner.ok("MOVED:$moved", "/home/u1001", "MOVED:2");
        runner.ok("chown -R", "/home/u1001", "");
        runner.ok("chmod", "/home/u1001/web", "");
        runner.ok("chmod", "/home/u1001/web/log", "");
        runner.ok("systemctl reload", "nginx php8.2-fpm", "");
        let marker_lines = ["MARKER:public", "MARKER:log", "MARKER:run", "MARKER:index"]
            [..markers]
            .join("\n");
        runner.ok("MARKER:index", "/home/u1001/web", &marker_lines);
        runner
    }

    #[test]
    fn test_preflight_rejects_terminal_states() {
        let (_dir, store) = store();
        let runner = FakeRunner::new();
        for status in [
            TenantStatus::InProgress,
            TenantStatus::Migrated,
            TenantStatus::Native,
            TenantStatus::Failed,
        ] {
            let mut tenant = tenant();
            tenant.status = status;
            let err = migrate(
                &store,
                &runner,
                &node(),
                &mut tenant,
                &MigrationOptions::default(),
                &CancelToken::new(),
            )
            .unwrap_err();
            assert!(err.to_string().contains("can be migrated"), "{err}");
            // The guard fires before any remote call.
            assert!(runner.calls().is_empty());
        }
    }

    #[test]
    fn test_successful_migration() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        store.save_tenant(&mut tenant).unwrap();
        let runner = migration_runner(4);

        let outcome = migrate(
            &store,
            &runner,
            &node(),
            &mut tenant,
            &MigrationOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(outcome.migrated);
        assert_eq!(outcome.moves, 2);
        assert_eq!(outcome.markers, 4);
        assert_eq!(tenant.status, TenantStatus::Migrated);
        let record = tenant.migration_log.last().unwrap();
        assert!(record.passed);
        assert_eq!(record.steps_completed, STEP_NAMES);
        let archive = record.archive_path.as_deref().unwrap();
        assert!(archive.starts_with("/var/backups/vhost/mail.example.com/pre-migration-"));
        assert!(archive.ends_with(".tar.gz"));
        assert!(record.snapshot_checksum.is_some());
        assert!(tenant.legacy_config.is_some());

        // The record on disk matches.
        let loaded = store.load_tenant(&tenant.key()).unwrap();
        assert_eq!(loaded.status, TenantStatus::Migrated);
        assert_eq!(loaded.migration_log.len(), 1);
    }

    #[test]
    fn test_verification_gate_fails_migration() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        store.save_tenant(&mut tenant).unwrap();
        // Steps 1-4 succeed, but only 2 of 4 markers exist afterwards.
        let runner = migration_runner(2);

        let outcome = migrate(
            &store,
            &runner,
            &node(),
            &mut tenant,
            &MigrationOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(!outcome.migrated);
        assert_eq!(outcome.markers, 2);
        assert_eq!(tenant.status, TenantStatus::Failed);
        let record = tenant.migration_log.last().unwrap();
        assert!(!record.passed);
        assert!(record.error.as_deref().unwrap().contains("2 of 4"));
        assert!(record.steps_completed.contains(&"permissions_updated".to_string()));
        assert!(!record.steps_completed.contains(&"verified".to_string()));
    }

    #[test]
    fn test_no_backup_records_warning() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        store.save_tenant(&mut tenant).unwrap();
        let runner = migration_runner(4);

        let outcome = migrate(
            &store,
            &runner,
            &node(),
            &mut tenant,
            &MigrationOptions { skip_backup: true },
            &CancelToken::new(),
        )
        .unwrap();

        assert!(outcome.migrated);
        let record = tenant.migration_log.last().unwrap();
        assert!(record.archive_path.is_none());
        assert!(record.warnings.iter().any(|w| w.contains("opt-out")));
        assert_eq!(runner.call_count("tar -czf", ""), 0);
    }

    #[test]
    fn test_failed_step_preserves_partial_log() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        store.save_tenant(&mut tenant).unwrap();
        let runner = migration_runner(4);
        // Permission normalization breaks.
        runner.fail("chown -R", "/home/u1001", 1);

        let err = migrate(
            &store,
            &runner,
            &node(),
            &mut tenant,
            &MigrationOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(err.to_string().contains("ownership"), "{err}");
        assert_eq!(tenant.status, TenantStatus::Failed);
        let record = tenant.migration_log.last().unwrap();
        assert!(!record.passed);
        assert!(record.steps_completed.contains(&"structurally_migrated".to_string()));
        assert!(record.error.is_some());
        // Persisted, not just in memory.
        let loaded = store.load_tenant(&tenant.key()).unwrap();
        assert_eq!(loaded.migration_log.len(), 1);
    }

    #[test]
    fn test_cancellation_between_steps() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        store.save_tenant(&mut tenant).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = migrate(
            &store,
            &runner_that_never_runs(),
            &node(),
            &mut tenant,
            &MigrationOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(tenant.status, TenantStatus::Failed);
    }

    fn runner_that_never_runs() -> FakeRunner {
        FakeRunner::new()
    }

    #[test]
    fn test_rollback_requires_archive() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        store.save_tenant(&mut tenant).unwrap();
        let err = rollback(
            &store,
            &FakeRunner::new(),
            &node(),
            &mut tenant,
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no recorded backup archive"));
    }

    #[test]
    fn test_rollback_restores_and_revalidates() {
        let (_dir, store) = store();
        let mut tenant = tenant();
        tenant.status = TenantStatus::Failed;
        tenant.migration_log.push(MigrationRecord {
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            steps_completed: vec!["backup_created".into()],
            archive_path: Some(
                "/var/backups/vhost/mail.example.com/pre-migration-20260806.tar.gz".into(),
            ),
            snapshot_checksum: None,
            passed: false,
            warnings: vec![],
            error: Some("verification failed".into()),
        });
        store.save_tenant(&mut tenant).unwrap();

        let runner = FakeRunner::new();
        runner.ok("systemctl stop", "nginx", "");
        runner.ok("tar -xzf", "pre-migration-20260806.tar.gz", "");
        runner.ok("chown -R", "/home/u1001", "");
        runner.ok("chmod", "/home/u1001/web", "");
        runner.ok("chmod", "/home/u1001/web/log", "");
        runner.ok("systemctl restart", "nginx", "");

        rollback(&store, &runner, &node(), &mut tenant, None, &CancelToken::new()).unwrap();
        assert_eq!(tenant.status, TenantStatus::Validated);
        assert_eq!(
            store.load_tenant(&tenant.key()).unwrap().status,
            TenantStatus::Validated
        );
    }

    // ------------------------------------------------------------------
    // Real-shell tests: the idempotency and round-trip guarantees live in
    // the scripts themselves, so exercise them against a local sh.
    // ------------------------------------------------------------------

    #[cfg(unix)]
    #[test]
    fn test_structural_transform_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tenant");
        std::fs::create_dir_all(base.join("public_html")).unwrap();
        std::fs::write(base.join("public_html/index.php"), "<?php\n").unwrap();
        std::fs::create_dir_all(base.join("logs")).unwrap();
        std::fs::write(base.join("logs/access.log"), "hit\n").unwrap();

        let base_str = base.display().to_string();
        let first = run_local(&scripts::migrate_layout(&base_str));
        assert!(first.success, "{}", first.stderr);
        assert_eq!(parse_moves(&first.stdout), 2);
        assert!(base.join("web/app/public/index.php").exists());
        assert!(base.join("web/log/access.log").exists());
        assert!(base.join("web/run").is_dir());
        assert!(!base.join("public_html").exists());

        // Second run: nothing left to move, still succeeds.
        let second = run_local(&scripts::migrate_layout(&base_str));
        assert!(second.success, "{}", second.stderr);
        assert_eq!(parse_moves(&second.stdout), 0);
        assert!(base.join("web/app/public/index.php").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_backup_restore_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tenant");
        std::fs::create_dir_all(base.join("public_html")).unwrap();
        std::fs::write(base.join("public_html/index.php"), "original\n").unwrap();
        let archive = dir.path().join("backups/pre-migration-test.tar.gz");

        let base_str = base.display().to_string();
        let archive_str = archive.display().to_string();

        let backup = run_local(&scripts::backup_tree(&base_str, &archive_str));
        assert!(backup.success, "{}", backup.stderr);
        assert!(archive.exists());

        // Mutate the tree, then restore.
        std::fs::write(base.join("public_html/index.php"), "mutated\n").unwrap();
        std::fs::write(base.join("stray.txt"), "stray\n").unwrap();

        let restore = run_local(&scripts::restore_tree(&base_str, &archive_str));
        assert!(restore.success, "{}", restore.stderr);
        let restored = std::fs::read_to_string(base.join("public_html/index.php")).unwrap();
        assert_eq!(restored, "original\n");
    }

    #[test]
    fn test_parse_moves() {
        assert_eq!(parse_moves("MOVED:2\n"), 2);
        assert_eq!(parse_moves("noise\nMOVED:0"), 0);
        assert_eq!(parse_moves(""), 0);
    }
}

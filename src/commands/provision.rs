//! Provision command: derive a tenant's configuration and push its initial
//! remote state.

use anyhow::{Context as _, Result, bail};
use drift::{Finding, FindingCategory, PreferTenantUser, Severity, ValidationReport};
use sshkit::Runner;
use std::collections::BTreeMap;

use crate::Context;
use crate::cancel::CancelToken;
use crate::cli::ProvisionArgs;
use crate::reconcile::Reconciler;
use crate::store::{Tenant, TenantKey};
use crate::{commands, generator, osprofile, scripts, ui};

pub fn run(ctx: &Context, args: ProvisionArgs) -> Result<()> {
    let env = commands::env()?;

    if !generator::valid_domain(&args.domain) {
        bail!("'{}' is not a valid domain name", args.domain);
    }

    let mut node = env
        .store
        .load_node(&args.node)
        .with_context(|| format!("unknown node {}; register it with 'vhostctl nodes add'", args.node))?;
    let group = args.group.clone().unwrap_or_else(|| node.group.clone());

    let key = TenantKey {
        group: group.clone(),
        node: node.name.clone(),
        domain: args.domain.clone(),
    };
    if env.store.load_tenant(&key).is_ok() {
        bail!("tenant {key} already exists; use validate/repair to converge it");
    }

    let overrides = parse_overrides(&args.overrides)?;
    let runner = commands::make_runner(&env)?;
    let opts = commands::exec_opts(&env);

    // OS fingerprint: explicit flag, else live probe, else the node record.
    let os_hint = match &args.os {
        Some(family) => Some(osprofile::OsFingerprint {
            family: family.parse().map_err(anyhow::Error::msg)?,
            codename: String::new(),
        }),
        None => match runner.run_capture(&node.target(), &scripts::os_release(), &opts) {
            Ok(output) => {
                let fingerprint = osprofile::parse_os_release(&output);
                if let Some(fp) = &fingerprint {
                    node.os = Some(fp.clone());
                    env.store.save_node(&node)?;
                }
                fingerprint
            }
            Err(e) => {
                log::warn!("OS probe failed on {}: {e}", node.name);
                node.os.clone()
            }
        },
    };

    // UID probe. Failure degrades to the admin+1 fallback inside the
    // generator, never an error.
    let existing_uids = match runner.run_capture(
        &node.target(),
        &scripts::list_uids(generator::ADMIN_UID),
        &opts,
    ) {
        Ok(output) => Some(
            output
                .lines()
                .filter_map(|l| l.trim().parse::<u32>().ok())
                .collect::<Vec<u32>>(),
        ),
        Err(e) => {
            log::warn!("UID probe failed on {}: {e}", node.name);
            None
        }
    };

    let req = generator::GenerateRequest {
        node: &node,
        domain: &args.domain,
        overrides: &overrides,
        os_hint: os_hint.as_ref(),
        existing_uids: existing_uids.as_deref(),
    };
    let config = generator::generate(&req, &mut rand::rngs::OsRng);

    let mut tenant = Tenant::new(&args.domain, &group, &node.name);
    tenant.config = config;
    env.store.save_tenant(&mut tenant)?;

    ui::header(&format!("Provisioned {}", tenant.key()));
    ui::kv("user", tenant.config.user());
    ui::kv("uid", tenant.config.get_or_empty("U_UID"));
    ui::kv("base", tenant.config.base_path());
    ui::kv("os", tenant.config.get_or_empty("OS_FAMILY"));
    ui::kv("keys", &tenant.config.len().to_string());

    if args.no_push {
        ui::info("configuration stored; remote state untouched (--no-push)");
        return Ok(());
    }

    // Push initial state through the same engine repair uses: a fresh
    // tenant is, by definition, one with no remote footprint.
    let mut report = ValidationReport::new();
    report.add(Finding::new(
        FindingCategory::NoFootprint,
        Severity::Critical,
        "freshly provisioned tenant",
    ));
    let engine = Reconciler::new(&runner, &PreferTenantUser);
    let plan = engine.plan(&tenant.config, &report);
    if !ctx.quiet {
        ui::section("Initial push");
        for planned in &plan.actions {
            ui::dim(planned.action.label());
        }
    }
    let (summary, outcomes) = engine.execute(
        &env.store,
        &mut tenant,
        &node,
        &plan,
        false,
        &CancelToken::new(),
    )?;
    for (planned, outcome) in &outcomes {
        if let drift::RepairOutcome::Failed { error } = outcome {
            ui::error(&format!("{}: {error}", planned.action.label()));
        }
    }
    if !summary.is_success() {
        bail!("initial push failed for {} of {} actions", summary.failed, summary.total());
    }
    ui::success(&format!("{} provisioned on {}", args.domain, node.name));
    Ok(())
}

fn parse_overrides(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("override '{pair}' is not KEY=VALUE"))?;
        overrides.insert(key.trim().to_string(), value.to_string());
    }
    Ok(overrides)
}

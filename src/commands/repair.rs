//! Repair command: converge drift found by a fresh validation.

use anyhow::{Result, bail};
use colored::Colorize;
use drift::{PreferTenantUser, RepairOutcome};

use crate::Context;
use crate::cancel::CancelToken;
use crate::cli::RepairArgs;
use crate::reconcile::Reconciler;
use crate::{commands, ui, validator};

pub fn run(ctx: &Context, args: RepairArgs) -> Result<()> {
    let env = commands::env()?;
    let key = commands::resolve_selector(&env.store, &args.tenant)?;
    let (mut tenant, node) = commands::load_pair(&env.store, &key)?;
    let runner = commands::make_runner(&env)?;

    // Always re-probe: the last snapshot is a cache, not a source of truth.
    let report = validator::validate(&runner, &node, &tenant)?;
    let engine = Reconciler::new(&runner, &PreferTenantUser);
    let plan = engine.plan(&tenant.config, &report);

    if plan.is_empty() {
        ui::success(&format!("{key} is converged; nothing to repair"));
        return Ok(());
    }

    ui::header(&format!("Repair plan: {key}"));
    for planned in &plan.actions {
        println!(
            "  {} {:<20} {}",
            "~".yellow(),
            planned.action.label(),
            format!("({})", planned.reason).dimmed()
        );
    }

    if args.dry_run {
        ui::info(&format!("dry run - {} actions planned, none executed", plan.len()));
        return Ok(());
    }

    if !commands::confirm(&format!("Apply {} repairs to {key}?", plan.len()), args.yes)? {
        ui::warn("aborted");
        return Ok(());
    }

    let (summary, outcomes) = engine.execute(
        &env.store,
        &mut tenant,
        &node,
        &plan,
        false,
        &CancelToken::new(),
    )?;

    println!();
    for (planned, outcome) in &outcomes {
        match outcome {
            RepairOutcome::Fixed => ui::success(planned.action.label()),
            RepairOutcome::NoChange => ui::dim(&format!("{} (no change)", planned.action.label())),
            RepairOutcome::Skipped { reason } => {
                ui::dim(&format!("{} (skipped: {reason})", planned.action.label()));
            }
            RepairOutcome::Failed { error } => {
                ui::error(&format!("{}: {error}", planned.action.label()));
            }
        }
    }

    // Refresh the cached snapshot from post-repair reality.
    if summary.is_success() {
        let report = validator::validate(&runner, &node, &tenant)?;
        if !ctx.quiet {
            println!();
            println!("  post-repair: {}", ui::status_label(report.status()));
        }
        super::validate::record_snapshot(&env.store, &mut tenant, &report)?;
        ui::success(&format!("{} repairs applied", summary.fixed));
        Ok(())
    } else {
        bail!("{} of {} repairs failed", summary.failed, summary.total());
    }
}

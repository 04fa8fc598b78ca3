//! Migrate command: legacy layout → web-centric layout.

use anyhow::{Result, bail};
use colored::Colorize;

use crate::Context;
use crate::cancel::CancelToken;
use crate::cli::MigrateArgs;
use crate::migration::{self, MigrationOptions, STEP_NAMES};
use crate::{commands, ui};

pub fn run(ctx: &Context, args: MigrateArgs) -> Result<()> {
    let env = commands::env()?;
    let key = commands::resolve_selector(&env.store, &args.tenant)?;
    let (mut tenant, node) = commands::load_pair(&env.store, &key)?;

    ui::header(&format!("Migration: {key}"));
    ui::kv("status", tenant.status.as_str());
    ui::kv("base", tenant.config.base_path());
    if args.no_backup {
        ui::warn("backup will be skipped (--no-backup); rollback will be impossible");
    }

    if args.dry_run {
        ui::section("Planned steps");
        for (index, step) in STEP_NAMES.iter().enumerate() {
            ui::step(index + 1, STEP_NAMES.len(), step);
        }
        ui::info("dry run - nothing executed");
        return Ok(());
    }

    if !tenant.status.migration_eligible() {
        bail!(migration::MigrationError::IneligibleState {
            domain: tenant.domain.clone(),
            status: tenant.status,
        });
    }

    if !commands::confirm(&format!("Migrate {key} now?"), args.yes)? {
        ui::warn("aborted");
        return Ok(());
    }

    let runner = commands::make_runner(&env)?;
    let outcome = migration::migrate(
        &env.store,
        &runner,
        &node,
        &mut tenant,
        &MigrationOptions {
            skip_backup: args.no_backup,
        },
        &CancelToken::new(),
    )?;

    let record = tenant.migration_log.last();
    if !ctx.quiet {
        println!();
        for step in record.map(|r| r.steps_completed.as_slice()).unwrap_or_default() {
            println!("  {} {step}", "✓".green());
        }
        for warning in record.map(|r| r.warnings.as_slice()).unwrap_or_default() {
            ui::warn(warning);
        }
        if let Some(archive) = record.and_then(|r| r.archive_path.as_deref()) {
            ui::kv("backup", archive);
        }
    }

    if outcome.migrated {
        ui::success(&format!(
            "{key} migrated ({} subtrees moved, {}/4 markers verified)",
            outcome.moves, outcome.markers
        ));
        Ok(())
    } else {
        bail!(
            "migration failed verification: {}/4 markers present, tenant marked failed",
            outcome.markers
        );
    }
}

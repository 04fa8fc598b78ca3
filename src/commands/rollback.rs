//! Rollback command: restore a tenant from its pre-migration archive.

use anyhow::Result;

use crate::Context;
use crate::cancel::CancelToken;
use crate::cli::RollbackArgs;
use crate::{commands, migration, ui};

pub fn run(_ctx: &Context, args: RollbackArgs) -> Result<()> {
    let env = commands::env()?;
    let key = commands::resolve_selector(&env.store, &args.tenant)?;
    let (mut tenant, node) = commands::load_pair(&env.store, &key)?;

    let archive = args
        .archive
        .as_deref()
        .or_else(|| tenant.latest_archive())
        .map(ToString::to_string);

    ui::header(&format!("Rollback: {key}"));
    match &archive {
        Some(archive) => ui::kv("archive", archive),
        None => ui::warn("no backup archive recorded for this tenant"),
    }

    if !commands::confirm(
        &format!("Stop services and restore {key} from the archive?"),
        args.yes,
    )? {
        ui::warn("aborted");
        return Ok(());
    }

    let runner = commands::make_runner(&env)?;
    migration::rollback(
        &env.store,
        &runner,
        &node,
        &mut tenant,
        args.archive.as_deref(),
        &CancelToken::new(),
    )?;

    ui::success(&format!("{key} restored; status is now {}", tenant.status));
    Ok(())
}

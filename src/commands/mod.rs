pub mod doctor;
pub mod migrate;
pub mod nodes;
pub mod provision;
pub mod repair;
pub mod rollback;
pub mod tenants;
pub mod validate;

use anyhow::{Context as _, Result, bail};
use sshkit::{ExecOptions, SshPool, SshRunner};

use crate::cli::TenantSelector;
use crate::config::AppConfig;
use crate::resolver::{self, TenantQuery};
use crate::store::{NodeRecord, Store, Tenant, TenantKey};
use crate::ui;

/// Everything a command needs to get going.
pub struct Env {
    pub config: AppConfig,
    pub store: Store,
}

/// Load config and open the store.
pub fn env() -> Result<Env> {
    let config = AppConfig::load()?;
    let store = Store::new(config.data_dir()?);
    Ok(Env { config, store })
}

/// Build the pooled transport runner.
pub fn make_runner(env: &Env) -> Result<SshRunner> {
    let pool = SshPool::new(env.config.socket_dir()?)
        .context("Could not create transport socket directory")?;
    Ok(SshRunner::with_config(pool, env.config.ssh_config()))
}

/// Base execution options with the configured command timeout.
#[must_use]
pub fn exec_opts(env: &Env) -> ExecOptions {
    ExecOptions::live().with_timeout(env.config.command_timeout())
}

/// Resolve a CLI tenant selector to a unique identity.
///
/// An ambiguous match is a user error: print the candidates and how to
/// disambiguate before failing.
pub fn resolve_selector(store: &Store, selector: &TenantSelector) -> Result<TenantKey> {
    let mut query = TenantQuery::domain(&selector.domain);
    if let Some(node) = &selector.node {
        query = query.on_node(node);
    }
    if let Some(group) = &selector.group {
        query = query.in_group(group);
    }
    match resolver::resolve(store, &query) {
        Ok(resolved) => {
            log::debug!(
                "resolved {} via {:?}",
                resolved.key,
                resolved.provenance
            );
            Ok(resolved.key)
        }
        Err(resolver::ResolveError::Ambiguous { candidates, .. }) => {
            ui::error(&format!(
                "'{}' matches more than one tenant:",
                selector.domain
            ));
            for candidate in &candidates {
                ui::dim(&candidate.to_string());
            }
            bail!("re-run with --node (and --group if needed) to disambiguate");
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the tenant and its node in one go.
pub fn load_pair(store: &Store, key: &TenantKey) -> Result<(Tenant, NodeRecord)> {
    let tenant = store.load_tenant(key)?;
    let node = store
        .load_node(&tenant.node)
        .with_context(|| format!("tenant {key} references unknown node {}", tenant.node))?;
    Ok((tenant, node))
}

/// Ask for confirmation unless `--yes` was passed.
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

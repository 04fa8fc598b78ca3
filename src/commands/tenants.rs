//! Tenant inspection commands.

use anyhow::Result;
use colored::Colorize;
use similar::{ChangeTag, TextDiff};

use crate::Context;
use crate::cli::TenantsCommand;
use crate::desired::CREDENTIAL_KEYS;
use crate::{commands, generator, ui};

pub fn run(ctx: &Context, cmd: TenantsCommand) -> Result<()> {
    match cmd {
        TenantsCommand::List => list(ctx),
        TenantsCommand::Show { tenant, diff } => show(ctx, &tenant, diff),
    }
}

/// Resolve a tenant identity and print the triple, exactly the way every
/// other operation resolves it.
pub fn resolve(_ctx: &Context, args: &crate::cli::ResolveArgs) -> Result<()> {
    let env = commands::env()?;
    let key = commands::resolve_selector(&env.store, &args.tenant)?;
    ui::kv("group", &key.group);
    ui::kv("node", &key.node);
    ui::kv("domain", &key.domain);
    Ok(())
}

fn list(_ctx: &Context) -> Result<()> {
    let env = commands::env()?;
    let keys = env.store.list_tenants();
    if keys.is_empty() {
        ui::info("No tenants stored.");
        return Ok(());
    }

    ui::header(&format!("Tenants ({})", keys.len()));
    for key in keys {
        match env.store.load_tenant(&key) {
            Ok(tenant) => {
                let validation = tenant
                    .last_validation
                    .map(|v| v.status.as_str().to_string())
                    .unwrap_or_else(|| "never validated".to_string());
                println!(
                    "  {:<40} {:<12} {}",
                    key.to_string(),
                    tenant.status.as_str(),
                    validation.dimmed()
                );
            }
            Err(e) => println!("  {:<40} {}", key.to_string(), format!("{e:#}").red()),
        }
    }
    Ok(())
}

fn show(ctx: &Context, selector: &crate::cli::TenantSelector, diff: bool) -> Result<()> {
    let env = commands::env()?;
    let key = commands::resolve_selector(&env.store, selector)?;
    let (tenant, node) = commands::load_pair(&env.store, &key)?;

    ui::header(&key.to_string());
    ui::kv("status", tenant.status.as_str());
    ui::kv("node", &format!("{} ({})", node.name, node.hostname));
    ui::kv("created", &tenant.created_at.to_rfc3339());
    if let Some(validation) = &tenant.last_validation {
        ui::kv(
            "last validation",
            &format!(
                "{} at {} ({} warnings, {} issues)",
                validation.status, validation.checked_at, validation.warnings, validation.issues
            ),
        );
    }
    if !tenant.migration_log.is_empty() {
        ui::section("Migration log");
        for record in &tenant.migration_log {
            let state = if record.passed { "✓".green() } else { "✗".red() };
            println!(
                "  {state} {} steps={} {}",
                record.started_at.format("%Y-%m-%d %H:%M"),
                record.steps_completed.len(),
                record.archive_path.as_deref().unwrap_or("-").dimmed()
            );
        }
    }

    ui::section(&format!("Configuration ({} keys)", tenant.config.len()));
    for (key, value) in tenant.config.iter() {
        if CREDENTIAL_KEYS.contains(&key) {
            ui::kv(key, &"•".repeat(8));
        } else if ctx.verbose > 0 || !value.contains(' ') {
            ui::kv(key, value);
        } else {
            ui::kv(key, &format!("{}…", &value[..value.len().min(40)]));
        }
    }

    if diff {
        show_regeneration_diff(&tenant, &node)?;
    }
    Ok(())
}

/// Diff the stored configuration against a fresh deterministic
/// regeneration (identity and credentials preserved). Surfaces record
/// drift after OS table or template changes without touching the node.
fn show_regeneration_diff(tenant: &crate::store::Tenant, node: &crate::store::NodeRecord) -> Result<()> {
    let mut overrides = tenant.config.credentials();
    for key in ["UUSER", "U_UID", "U_GID"] {
        if let Some(value) = tenant.config.get(key) {
            overrides.insert(key.to_string(), value.to_string());
        }
    }
    let req = generator::GenerateRequest {
        node,
        domain: &tenant.domain,
        overrides: &overrides,
        os_hint: node.os.as_ref(),
        existing_uids: None,
    };
    let regenerated = generator::generate(&req, &mut rand::rngs::OsRng);

    let stored = toml::to_string_pretty(&tenant.config)?;
    let fresh = toml::to_string_pretty(&regenerated)?;
    if stored == fresh {
        ui::success("stored configuration matches regeneration");
        return Ok(());
    }

    ui::section("Drift against regeneration");
    let diff = TextDiff::from_lines(&stored, &fresh);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => print!("  {}", format!("- {change}").red()),
            ChangeTag::Insert => print!("  {}", format!("+ {change}").green()),
            ChangeTag::Equal => {}
        }
    }
    Ok(())
}

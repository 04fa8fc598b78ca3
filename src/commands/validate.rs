//! Validate command: one tenant, or a fleet-wide sweep.

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use colored::Colorize;
use drift::ValidationReport;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::Mutex;

use crate::Context;
use crate::cli::{TenantSelector, ValidateArgs};
use crate::store::{Store, TenantKey, TenantStatus, ValidationSnapshot};
use crate::{commands, ui, validator};

pub fn run(ctx: &Context, args: ValidateArgs) -> Result<()> {
    if args.all {
        return sweep(ctx, args.jobs as usize, args.json);
    }
    let Some(domain) = args.domain.clone() else {
        bail!("pass a domain, or --all for a fleet sweep");
    };
    single(
        ctx,
        &TenantSelector {
            domain,
            node: args.node,
            group: args.group,
        },
        args.json,
    )
}

fn single(ctx: &Context, selector: &TenantSelector, json: bool) -> Result<()> {
    let env = commands::env()?;
    let key = commands::resolve_selector(&env.store, selector)?;
    let (mut tenant, node) = commands::load_pair(&env.store, &key)?;
    let runner = commands::make_runner(&env)?;

    let report = validator::validate(&runner, &node, &tenant)?;
    record_snapshot(&env.store, &mut tenant, &report)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    ui::header(&format!("Validation: {key}"));
    if ctx.verbose > 0 {
        for finding in &report.passed {
            println!("  {} {}", "✓".green(), finding.message.clone().dimmed());
        }
    }
    for finding in &report.warnings {
        println!("  {} {}", "⚠".yellow(), finding.message);
        print_expectation(finding);
    }
    for finding in &report.issues {
        println!("  {} {}", "✗".red(), finding.message);
        print_expectation(finding);
    }
    println!();
    println!(
        "  {} ({} passed, {} warnings, {} issues)",
        ui::status_label(report.status()),
        report.passed.len(),
        report.warnings.len(),
        report.issues.len()
    );
    Ok(())
}

fn print_expectation(finding: &drift::Finding) {
    if let (Some(expected), Some(actual)) = (&finding.expected, &finding.actual) {
        ui::dim(&format!("expected {expected}, found {actual}"));
    }
}

/// Validate every stored tenant. Tenants are independent, so the sweep
/// fans out across a bounded worker pool; each tenant's own validation
/// stays a single sequential chain.
fn sweep(_ctx: &Context, jobs: usize, json: bool) -> Result<()> {
    let env = commands::env()?;
    let keys = env.store.list_tenants();
    if keys.is_empty() {
        ui::info("No tenants stored.");
        return Ok(());
    }

    let runner = commands::make_runner(&env)?;
    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    let results: Mutex<Vec<(TenantKey, Result<ValidationReport>)>> = Mutex::new(Vec::new());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("Failed to create worker pool")?;

    pool.install(|| {
        keys.par_iter().for_each(|key| {
            let outcome = validate_one(&env.store, &runner, key);
            pb.inc(1);
            pb.set_message(key.domain.clone());
            results.lock().unwrap().push((key.clone(), outcome));
        });
    });
    pb.finish_and_clear();

    let mut results = results.into_inner().unwrap();
    results.sort_by(|a, b| a.0.cmp(&b.0));

    if json {
        let entries: Vec<serde_json::Value> = results
            .iter()
            .map(|(key, outcome)| match outcome {
                Ok(report) => serde_json::json!({
                    "tenant": key.to_string(),
                    "status": report.status().as_str(),
                    "warnings": report.warnings.len(),
                    "issues": report.issues.len(),
                }),
                Err(e) => serde_json::json!({
                    "tenant": key.to_string(),
                    "error": format!("{e:#}"),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    ui::header(&format!("Fleet validation ({} tenants)", results.len()));
    let mut unreachable = 0usize;
    for (key, outcome) in &results {
        match outcome {
            Ok(report) => println!("  {:<40} {}", key.to_string(), ui::status_label(report.status())),
            Err(e) => {
                unreachable += 1;
                println!("  {:<40} {} {}", key.to_string(), "✗".red(), format!("{e:#}").red());
            }
        }
    }
    if unreachable > 0 {
        bail!("{unreachable} tenants could not be validated");
    }
    Ok(())
}

fn validate_one(
    store: &Store,
    runner: &dyn sshkit::Runner,
    key: &TenantKey,
) -> Result<ValidationReport> {
    let (mut tenant, node) = commands::load_pair(store, key)?;
    let report = validator::validate(runner, &node, &tenant)?;
    record_snapshot(store, &mut tenant, &report)?;
    Ok(report)
}

/// Cache the summary on the tenant record. A healthy result promotes a
/// freshly discovered tenant to `validated`.
pub(crate) fn record_snapshot(
    store: &Store,
    tenant: &mut crate::store::Tenant,
    report: &ValidationReport,
) -> Result<()> {
    tenant.last_validation = Some(ValidationSnapshot {
        status: report.status(),
        checked_at: Utc::now(),
        warnings: report.warnings.len(),
        issues: report.issues.len(),
    });
    if tenant.status == TenantStatus::Discovered && report.status().is_healthy() {
        tenant.status = TenantStatus::Validated;
    }
    store.save_tenant(tenant)
}

use anyhow::Result;
use colored::Colorize;
use std::process::{Command, Stdio};

use crate::Context;
use crate::config::{self, AppConfig};
use crate::{commands, ui};

struct Issue {
    category: &'static str,
    summary: String,
    fix: Option<String>,
}

pub fn run(_ctx: &Context) -> Result<()> {
    ui::header("Environment Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    check_commands(&mut issues);
    check_config(&mut issues);
    check_store(&mut issues);

    println!();
    if issues.is_empty() {
        ui::success("All systems healthy!");
    } else {
        print_issue_summary(&issues);
    }
    Ok(())
}

fn print_issue_summary(issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        println!(
            "  {}  {} {}",
            format!("{}.", i + 1).bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
    }
}

fn check_commands(issues: &mut Vec<Issue>) {
    ui::section("Required Commands");

    for (cmd, desc) in [
        ("ssh", "Remote shell transport"),
        ("ssh-keygen", "Key management"),
        ("tar", "Local snapshot archiving"),
    ] {
        if command_exists(cmd) {
            println!("  {} {} - {}", "✓".green(), cmd, desc.dimmed());
        } else {
            println!("  {} {} - {} {}", "✗".red(), cmd, desc, "(missing)".red());
            issues.push(Issue {
                category: "Required Commands",
                summary: format!("{cmd} is not installed"),
                fix: Some(format!("Install {cmd} with your package manager")),
            });
        }
    }
}

fn check_config(issues: &mut Vec<Issue>) {
    ui::section("Configuration");

    match config::config_dir() {
        Ok(dir) => {
            let path = dir.join("config.toml");
            if path.exists() {
                match AppConfig::load() {
                    Ok(_) => println!(
                        "  {} config.toml - {}",
                        "✓".green(),
                        "parsed".dimmed()
                    ),
                    Err(e) => {
                        println!("  {} config.toml - {}", "⚠".yellow(), format!("{e:#}").yellow());
                        issues.push(Issue {
                            category: "Configuration",
                            summary: "config.toml has invalid format".to_string(),
                            fix: Some(format!("Edit {} and fix the error", path.display())),
                        });
                    }
                }
            } else {
                println!(
                    "  {} config.toml - {}",
                    "○".dimmed(),
                    "(not configured, defaults in use)".dimmed()
                );
            }
        }
        Err(e) => issues.push(Issue {
            category: "Configuration",
            summary: format!("could not determine config directory: {e}"),
            fix: Some("Ensure $HOME is set".to_string()),
        }),
    }
}

fn check_store(issues: &mut Vec<Issue>) {
    ui::section("State Store");

    let env = match commands::env() {
        Ok(env) => env,
        Err(e) => {
            issues.push(Issue {
                category: "State Store",
                summary: format!("could not open store: {e:#}"),
                fix: None,
            });
            return;
        }
    };

    println!(
        "  {} store root - {}",
        "✓".green(),
        env.store.root().display().to_string().dimmed()
    );

    let tenants = env.store.list_tenants();
    let mut broken = 0usize;
    for key in &tenants {
        if let Err(e) = env.store.load_tenant(key) {
            broken += 1;
            issues.push(Issue {
                category: "State Store",
                summary: format!("tenant {key} record is unreadable: {e:#}"),
                fix: Some("Restore the record from a snapshot archive".to_string()),
            });
        }
    }
    println!(
        "  {} {} tenants indexed{}",
        if broken == 0 { "✓".green() } else { "⚠".yellow() },
        tenants.len(),
        if broken == 0 {
            String::new()
        } else {
            format!(", {broken} unreadable")
        }
    );

    let nodes = env.store.list_nodes();
    for name in &nodes {
        if let Err(e) = env.store.load_node(name) {
            issues.push(Issue {
                category: "State Store",
                summary: format!("node {name} record is unreadable: {e:#}"),
                fix: None,
            });
        }
    }
    println!("  {} {} nodes registered", "✓".green(), nodes.len());
}

fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

//! Node management commands.

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use sshkit::Runner;

use crate::Context;
use crate::cli::NodesCommand;
use crate::store::NodeRecord;
use crate::vps::VpsClient;
use crate::{commands, osprofile, scripts, ui};

pub fn run(ctx: &Context, cmd: NodesCommand) -> Result<()> {
    match cmd {
        NodesCommand::List => list(ctx),
        NodesCommand::Add {
            name,
            hostname,
            ssh_user,
            ssh_port,
            fqdn,
            group,
        } => add(ctx, &name, &hostname, &ssh_user, ssh_port, &fqdn, &group),
        NodesCommand::Probe { name } => probe(ctx, &name),
        NodesCommand::Provision { name, plan, region } => provision(ctx, &name, &plan, &region),
    }
}

fn list(_ctx: &Context) -> Result<()> {
    let env = commands::env()?;
    let names = env.store.list_nodes();
    if names.is_empty() {
        ui::info("No nodes registered.");
        return Ok(());
    }

    ui::header(&format!("Nodes ({})", names.len()));
    for name in names {
        match env.store.load_node(&name) {
            Ok(node) => {
                let os = node
                    .os
                    .map(|fp| format!("{} {}", fp.family, fp.codename))
                    .unwrap_or_else(|| "os unknown".to_string());
                println!(
                    "  {:<20} {:<24} {}",
                    node.name,
                    node.hostname,
                    os.dimmed()
                );
            }
            Err(e) => println!("  {:<20} {}", name, format!("{e:#}").red()),
        }
    }
    Ok(())
}

fn add(
    _ctx: &Context,
    name: &str,
    hostname: &str,
    ssh_user: &str,
    ssh_port: u16,
    fqdn: &str,
    group: &str,
) -> Result<()> {
    let env = commands::env()?;
    if env.store.load_node(name).is_ok() {
        bail!("node {name} already exists");
    }
    let node = NodeRecord {
        name: name.to_string(),
        group: group.to_string(),
        hostname: hostname.to_string(),
        ssh_user: ssh_user.to_string(),
        ssh_port,
        fqdn: fqdn.to_string(),
        os: None,
    };
    env.store.save_node(&node)?;
    ui::success(&format!("node {name} registered"));
    ui::dim("run 'vhostctl nodes probe' to detect its OS fingerprint");
    Ok(())
}

fn probe(_ctx: &Context, name: &str) -> Result<()> {
    let env = commands::env()?;
    let mut node = env.store.load_node(name)?;
    let runner = commands::make_runner(&env)?;

    let output = runner
        .run_capture(&node.target(), &scripts::os_release(), &commands::exec_opts(&env))
        .with_context(|| format!("OS probe failed on {name}"))?;

    let fingerprint = osprofile::parse_os_release(&output)
        .with_context(|| format!("unrecognized os-release output from {name}"))?;

    ui::kv("family", fingerprint.family.as_str());
    ui::kv("codename", &fingerprint.codename);
    ui::kv(
        "mirror",
        osprofile::profile(fingerprint.family).mirror,
    );
    node.os = Some(fingerprint);
    env.store.save_node(&node)?;
    ui::success(&format!("fingerprint stored for {name}"));
    Ok(())
}

fn provision(_ctx: &Context, name: &str, plan: &str, region: &str) -> Result<()> {
    let env = commands::env()?;
    let Some(vps) = env.config.vps.clone() else {
        bail!("no [vps] endpoint configured in config.toml");
    };
    if env.store.load_node(name).is_ok() {
        bail!("node {name} already exists");
    }

    let client = VpsClient::new(vps.endpoint, vps.token);
    ui::info(&format!("requesting {plan} in {region}..."));
    let server = client.create_server(name, plan, region)?;
    ui::kv("id", &server.id);
    ui::kv("status", &server.status);

    let Some(ip) = server.ip_address.clone() else {
        bail!(
            "server {} created but has no address yet; re-run 'nodes add' once it is active",
            server.id
        );
    };

    let node = NodeRecord {
        name: name.to_string(),
        group: "default".to_string(),
        hostname: ip,
        ssh_user: "root".to_string(),
        ssh_port: 22,
        fqdn: format!("{name}.fleet"),
        os: None,
    };
    env.store.save_node(&node)?;
    ui::success(&format!("node {name} provisioned and registered"));
    Ok(())
}

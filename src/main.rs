mod artifacts;
mod cancel;
mod cli;
mod commands;
mod config;
mod desired;
mod generator;
#[cfg(test)]
mod harness;
mod migration;
mod osprofile;
mod reconcile;
mod resolver;
mod scripts;
mod store;
mod ui;
mod validator;
mod vps;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Provision(args) => commands::provision::run(&ctx, args),
        Command::Validate(args) => commands::validate::run(&ctx, args),
        Command::Repair(args) => commands::repair::run(&ctx, args),
        Command::Migrate(args) => commands::migrate::run(&ctx, args),
        Command::Rollback(args) => commands::rollback::run(&ctx, args),
        Command::Resolve(args) => commands::tenants::resolve(&ctx, &args),
        Command::Tenants(cmd) => commands::tenants::run(&ctx, cmd),
        Command::Nodes(cmd) => commands::nodes::run(&ctx, cmd),
        Command::Doctor => commands::doctor::run(&ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "vhostctl", &mut io::stdout());
            Ok(())
        }
    }
}

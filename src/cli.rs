use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "vhostctl")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Unified CLI for managing virtual-host tenants across a fleet", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision a tenant: generate its configuration and push initial state
    Provision(ProvisionArgs),

    /// Validate a tenant (or the whole fleet) against live remote state
    Validate(ValidateArgs),

    /// Repair drift found by the last validation
    Repair(RepairArgs),

    /// Migrate a tenant from the legacy layout to the web-centric layout
    Migrate(MigrateArgs),

    /// Roll a tenant back from a pre-migration backup archive
    Rollback(RollbackArgs),

    /// Resolve a tenant identity (exercises the same resolver every
    /// operation uses)
    Resolve(ResolveArgs),

    /// Inspect stored tenants
    #[command(subcommand)]
    Tenants(TenantsCommand),

    /// Manage fleet nodes
    #[command(subcommand)]
    Nodes(NodesCommand),

    /// Run local environment health checks
    Doctor,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Tenant selection (shared by every single-tenant operation)
// ============================================================================

#[derive(clap::Args)]
pub struct TenantSelector {
    /// Tenant domain
    pub domain: String,

    /// Node hint, required when the domain exists on several nodes
    #[arg(long)]
    pub node: Option<String>,

    /// Group hint
    #[arg(long)]
    pub group: Option<String>,
}

// ============================================================================
// Command arguments
// ============================================================================

#[derive(clap::Args)]
pub struct ProvisionArgs {
    /// Tenant domain
    pub domain: String,

    /// Node to place the tenant on
    #[arg(long)]
    pub node: String,

    /// Group (defaults to the node's group)
    #[arg(long)]
    pub group: Option<String>,

    /// Skip the live OS probe and assume this family
    #[arg(long)]
    pub os: Option<String>,

    /// Explicit configuration overrides (KEY=VALUE, repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Only generate and store the configuration; do not touch the node
    #[arg(long)]
    pub no_push: bool,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Tenant domain (omit with --all)
    pub domain: Option<String>,

    /// Validate every stored tenant
    #[arg(long)]
    pub all: bool,

    /// Node hint
    #[arg(long)]
    pub node: Option<String>,

    /// Group hint
    #[arg(long)]
    pub group: Option<String>,

    /// Parallel workers for --all
    #[arg(short, long, default_value_t = 4)]
    pub jobs: u32,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct RepairArgs {
    #[command(flatten)]
    pub tenant: TenantSelector,

    /// Show the repair plan without executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub tenant: TenantSelector,

    /// Skip the backup step (recorded as a warning; rollback impossible)
    #[arg(long)]
    pub no_backup: bool,

    /// List the planned steps without executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct RollbackArgs {
    #[command(flatten)]
    pub tenant: TenantSelector,

    /// Archive to restore (defaults to the most recent recorded backup)
    #[arg(long)]
    pub archive: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub tenant: TenantSelector,
}

#[derive(Subcommand)]
pub enum TenantsCommand {
    /// List stored tenants
    List,

    /// Show one tenant's record
    Show {
        #[command(flatten)]
        tenant: TenantSelector,

        /// Diff the stored configuration against a fresh regeneration
        #[arg(long)]
        diff: bool,
    },
}

#[derive(Subcommand)]
pub enum NodesCommand {
    /// List registered nodes
    List,

    /// Register a node
    Add {
        /// Stable node name
        name: String,

        /// Network hostname or address
        #[arg(long)]
        hostname: String,

        /// SSH login user
        #[arg(long, default_value = "root")]
        ssh_user: String,

        /// SSH port
        #[arg(long, default_value_t = 22)]
        ssh_port: u16,

        /// Fully-qualified domain name of the node itself
        #[arg(long)]
        fqdn: String,

        /// Group the node belongs to
        #[arg(long, default_value = "default")]
        group: String,
    },

    /// Probe a node's OS fingerprint and store it
    Probe {
        /// Node name
        name: String,
    },

    /// Provision a new VPS through the configured provider
    Provision {
        /// Server name (becomes the node name)
        name: String,

        /// Provider plan identifier
        #[arg(long)]
        plan: String,

        /// Provider region
        #[arg(long)]
        region: String,
    },
}

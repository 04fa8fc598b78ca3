//! Persisted tenant and node records.
//!
//! TOML files under the state directory, one record per file:
//!
//! ```text
//! <root>/tenants/index.toml                          tenant index
//! <root>/tenants/<group>/<node>/<domain>/tenant.toml one tenant
//! <root>/nodes/<name>.toml                           one node
//! <root>/snapshots/<domain>-<stamp>.tar.gz           local record snapshots
//! ```
//!
//! Record writes go through a temp file + fsync + rename so a record is
//! either fully written or not written at all; mutating operations rely on
//! that to never leave a half-written record behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::desired::DesiredConfig;
use crate::osprofile::OsFingerprint;

// ============================================================================
// Records
// ============================================================================

/// Lifecycle of a tenant with respect to the layout migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Found on a node; config generated, never validated.
    Discovered,
    /// Validated against its node at least once.
    Validated,
    /// A migration is running; no other mutating operation may enter.
    InProgress,
    /// Migrated to the web-centric layout.
    Migrated,
    /// Provisioned directly on the current layout; nothing to migrate.
    Native,
    /// The last migration attempt failed.
    Failed,
}

impl TenantStatus {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Validated => "validated",
            Self::InProgress => "in_progress",
            Self::Migrated => "migrated",
            Self::Native => "native",
            Self::Failed => "failed",
        }
    }

    /// Whether a migration may be entered from this state.
    ///
    /// This doubles as the exclusivity guard: `in_progress` and terminal
    /// states reject re-entry.
    #[must_use]
    pub fn migration_eligible(&self) -> bool {
        matches!(self, Self::Discovered | Self::Validated)
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One migration attempt, append-only on the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps_completed: Vec<String>,
    /// Remote backup archive path, if a backup was taken.
    #[serde(default)]
    pub archive_path: Option<String>,
    /// blake3 of the local store snapshot.
    #[serde(default)]
    pub snapshot_checksum: Option<String>,
    pub passed: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Cached summary of the last validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSnapshot {
    pub status: drift::ValidationStatus,
    pub checked_at: DateTime<Utc>,
    pub warnings: usize,
    pub issues: usize,
}

/// A tenant: one domain's hosting footprint on one node.
///
/// Scalar fields precede the table-valued ones so the TOML encoder can
/// emit the record in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub domain: String,
    pub group: String,
    pub node: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub config: DesiredConfig,
    #[serde(default)]
    pub legacy_config: Option<DesiredConfig>,
    #[serde(default)]
    pub last_validation: Option<ValidationSnapshot>,
    #[serde(default)]
    pub migration_log: Vec<MigrationRecord>,
}

impl Tenant {
    /// Create a freshly discovered tenant.
    #[must_use]
    pub fn new(domain: &str, group: &str, node: &str) -> Self {
        let now = Utc::now();
        Self {
            domain: domain.to_string(),
            group: group.to_string(),
            node: node.to_string(),
            status: TenantStatus::Discovered,
            config: DesiredConfig::new(),
            legacy_config: None,
            migration_log: Vec::new(),
            last_validation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The tenant's store key.
    #[must_use]
    pub fn key(&self) -> TenantKey {
        TenantKey {
            group: self.group.clone(),
            node: self.node.clone(),
            domain: self.domain.clone(),
        }
    }

    /// Most recent migration record carrying a backup archive.
    #[must_use]
    pub fn latest_archive(&self) -> Option<&str> {
        self.migration_log
            .iter()
            .rev()
            .find_map(|r| r.archive_path.as_deref())
    }
}

/// A managed remote node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable name, distinct from the network hostname.
    pub name: String,
    pub group: String,
    pub hostname: String,
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Fully-qualified name used to decide whether a tenant is the node's
    /// own administrative identity.
    pub fqdn: String,
    #[serde(default)]
    pub os: Option<OsFingerprint>,
}

fn default_ssh_port() -> u16 {
    22
}

impl NodeRecord {
    /// The transport target for this node.
    #[must_use]
    pub fn target(&self) -> sshkit::NodeTarget {
        sshkit::NodeTarget::new(&self.name, &self.hostname, &self.ssh_user)
            .with_port(self.ssh_port)
    }
}

/// Fully-qualified tenant identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantKey {
    pub group: String,
    pub node: String,
    pub domain: String,
}

impl std::fmt::Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.node, self.domain)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TenantIndex {
    #[serde(default)]
    tenants: Vec<TenantKey>,
}

// ============================================================================
// Store
// ============================================================================

/// Filesystem-backed store for tenants and nodes.
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default state root (`~/.local/state/vhostctl`).
    pub fn default_root() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".local").join("state").join("vhostctl"))
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenants_dir(&self) -> PathBuf {
        self.root.join("tenants")
    }

    fn index_path(&self) -> PathBuf {
        self.tenants_dir().join("index.toml")
    }

    /// Directory holding one tenant's record.
    #[must_use]
    pub fn tenant_dir(&self, key: &TenantKey) -> PathBuf {
        self.tenants_dir()
            .join(&key.group)
            .join(&key.node)
            .join(&key.domain)
    }

    fn tenant_path(&self, key: &TenantKey) -> PathBuf {
        self.tenant_dir(key).join("tenant.toml")
    }

    fn node_path(&self, name: &str) -> PathBuf {
        self.root.join("nodes").join(format!("{name}.toml"))
    }

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    /// Load one tenant.
    pub fn load_tenant(&self, key: &TenantKey) -> Result<Tenant> {
        let path = self.tenant_path(key);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid tenant record {key}"))
    }

    /// Save one tenant, updating the index.
    pub fn save_tenant(&self, tenant: &mut Tenant) -> Result<()> {
        tenant.updated_at = Utc::now();
        let key = tenant.key();
        let content =
            toml::to_string_pretty(tenant).context("Failed to serialize tenant record")?;
        write_durable(&self.tenant_path(&key), content.as_bytes())?;

        let mut index = self.load_index();
        if !index.tenants.contains(&key) {
            index.tenants.push(key);
            index.tenants.sort();
            let content =
                toml::to_string_pretty(&index).context("Failed to serialize tenant index")?;
            write_durable(&self.index_path(), content.as_bytes())?;
        }
        Ok(())
    }

    fn load_index(&self) -> TenantIndex {
        let path = self.index_path();
        if !path.exists() {
            return TenantIndex::default();
        }
        fs::read_to_string(&path)
            .ok()
            .and_then(|c| toml::from_str(&c).ok())
            .unwrap_or_default()
    }

    /// Query the index for tenants matching the given hints.
    #[must_use]
    pub fn query_index(
        &self,
        domain: &str,
        node: Option<&str>,
        group: Option<&str>,
    ) -> Vec<TenantKey> {
        self.load_index()
            .tenants
            .into_iter()
            .filter(|k| {
                k.domain == domain
                    && node.is_none_or(|n| k.node == n)
                    && group.is_none_or(|g| k.group == g)
            })
            .collect()
    }

    /// All tenants in the index.
    #[must_use]
    pub fn list_tenants(&self) -> Vec<TenantKey> {
        self.load_index().tenants
    }

    /// Scan the on-disk registry directly, ignoring the index.
    ///
    /// The resolver's fallback when the index yields nothing; the directory
    /// tree is the secondary source of truth.
    #[must_use]
    pub fn scan_registry(
        &self,
        domain: &str,
        node: Option<&str>,
        group: Option<&str>,
    ) -> Vec<TenantKey> {
        let mut found = Vec::new();
        let base = self.tenants_dir();
        for entry in walkdir::WalkDir::new(&base)
            .min_depth(4)
            .max_depth(4)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if entry.file_name() != "tenant.toml" {
                continue;
            }
            let rel = match entry.path().strip_prefix(&base) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            // <group>/<node>/<domain>/tenant.toml
            if parts.len() != 4 || parts[2] != domain {
                continue;
            }
            if node.is_some_and(|n| parts[1] != n) || group.is_some_and(|g| parts[0] != g) {
                continue;
            }
            found.push(TenantKey {
                group: parts[0].clone(),
                node: parts[1].clone(),
                domain: parts[2].clone(),
            });
        }
        found.sort();
        found
    }

    // ------------------------------------------------------------------
    // Keyed config map interface
    // ------------------------------------------------------------------

    /// Load a tenant's Desired Configuration map.
    pub fn load_config(&self, key: &TenantKey) -> Result<DesiredConfig> {
        Ok(self.load_tenant(key)?.config)
    }

    /// Replace a tenant's Desired Configuration map.
    ///
    /// The write is durable before this returns; string values round-trip
    /// byte-for-byte through the TOML encoding.
    pub fn save_config(&self, key: &TenantKey, config: &DesiredConfig) -> Result<()> {
        let mut tenant = self.load_tenant(key)?;
        tenant.config = config.clone();
        self.save_tenant(&mut tenant)
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Load one node.
    pub fn load_node(&self, name: &str) -> Result<NodeRecord> {
        let path = self.node_path(name);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid node record {name}"))
    }

    /// Save one node.
    pub fn save_node(&self, node: &NodeRecord) -> Result<()> {
        let content = toml::to_string_pretty(node).context("Failed to serialize node record")?;
        write_durable(&self.node_path(&node.name), content.as_bytes())
    }

    /// All node names.
    #[must_use]
    pub fn list_nodes(&self) -> Vec<String> {
        let dir = self.root.join("nodes");
        let mut names: Vec<String> = fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter_map(|e| {
                        e.path()
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Archive a tenant's record directory locally, returning the archive
    /// path and its blake3 checksum. Taken before a migration mutates the
    /// record.
    pub fn snapshot_tenant(&self, key: &TenantKey) -> Result<(PathBuf, String)> {
        let source = self.tenant_dir(key);
        let snap_dir = self.root.join("snapshots");
        fs::create_dir_all(&snap_dir)?;

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let archive_path = snap_dir.join(format!("{}-{stamp}.tar.gz", key.domain));

        let file = fs::File::create(&archive_path)
            .with_context(|| format!("Could not create {}", archive_path.display()))?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(&key.domain, &source)
            .with_context(|| format!("Could not archive {}", source.display()))?;
        builder.into_inner()?.finish()?.sync_all()?;

        let bytes = fs::read(&archive_path)?;
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        Ok((archive_path, checksum))
    }
}

/// Write via temp file + fsync + rename so readers never observe a partial
/// record.
fn write_durable(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .context("Record path has no parent directory")?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let tmp = path.with_extension("toml.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to finalize {}", path.display()))?;
    Ok(())
}

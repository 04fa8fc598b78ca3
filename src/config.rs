use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("vhostctl"))
}

// ============================================================================
// App Config
// ============================================================================

/// Application configuration (`~/.config/vhostctl/config.toml`).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// State root override; defaults to `~/.local/state/vhostctl`.
    #[serde(default)]
    pub data_dir: Option<String>,

    #[serde(default)]
    pub ssh: SshSettings,

    /// VPS provisioning endpoint, if the fleet uses one.
    #[serde(default)]
    pub vps: Option<VpsSettings>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_control_persist")]
    pub control_persist_secs: u64,
    /// Bound on every remote command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_control_persist() -> u64 {
    60
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            control_persist_secs: default_control_persist(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpsSettings {
    pub endpoint: String,
    pub token: String,
}

impl AppConfig {
    /// Load config.toml, or defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.toml");
        if !path.exists() {
            log::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// The resolved state root.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => {
                let expanded = shellexpand::tilde(dir);
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => crate::store::Store::default_root(),
        }
    }

    /// Directory for transport control sockets.
    pub fn socket_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("sockets"))
    }

    /// Bound for a single remote command.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.command_timeout_secs)
    }

    /// The transport configuration derived from these settings.
    #[must_use]
    pub fn ssh_config(&self) -> sshkit::SshConfig {
        sshkit::SshConfig {
            connect_timeout_secs: self.ssh.connect_timeout_secs,
            control_persist_secs: self.ssh.control_persist_secs,
            ..sshkit::SshConfig::default()
        }
    }
}

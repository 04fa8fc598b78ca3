//! The execution seam.
//!
//! Higher layers depend on [`Runner`], not on OpenSSH, so validation and
//! repair logic can be exercised against fakes. The production
//! implementation is [`crate::SshRunner`].

use crate::error::{Error, Result};
use crate::script::Script;
use std::time::Duration;

/// Default bounded timeout for a single remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A reachable remote node, addressed by a stable name distinct from its
/// network hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    /// Stable node name (pool key, log label).
    pub name: String,
    /// Network hostname or address to connect to.
    pub host: String,
    /// Remote login user.
    pub user: String,
    /// SSH port.
    pub port: u16,
}

impl NodeTarget {
    /// Create a target with the default SSH port.
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            user: user.into(),
            port: 22,
        }
    }

    /// Override the SSH port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The `user@host` login spec.
    #[must_use]
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Per-call execution options.
///
/// Privileged execution is a flag here, not a separate code path, so every
/// caller can stay privilege-agnostic.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Run the script through `sudo -n` on the target.
    pub privileged: bool,
    /// Perform no network action; return synthetic success.
    pub dry_run: bool,
    /// Bounded timeout for the whole call.
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            privileged: false,
            dry_run: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ExecOptions {
    /// Options for an unprivileged live call.
    #[must_use]
    pub fn live() -> Self {
        Self::default()
    }

    /// Enable privileged execution.
    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Enable dry-run mode.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Override the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Output of a remote execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Whether the remote command exited zero.
    pub success: bool,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Exit code of the remote command (255 for transport failures).
    pub exit_code: i32,
}

impl ExecOutput {
    /// Synthetic success, used by dry-run mode.
    #[must_use]
    pub fn synthetic() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Trimmed stdout.
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs opaque shell scripts on named nodes.
///
/// Implementations must distinguish "command ran and returned non-zero"
/// (an `Ok` output with `success == false`) from transport-level failure
/// (an `Err` whose `exit_code()` is 255), and must honor dry-run by
/// returning [`ExecOutput::synthetic`] without touching the network.
pub trait Runner: Send + Sync {
    /// Execute a script on a node.
    fn run(&self, target: &NodeTarget, script: &Script, opts: &ExecOptions) -> Result<ExecOutput>;

    /// Execute and capture trimmed stdout, treating non-zero exit as an
    /// error carrying the remote output.
    fn run_capture(
        &self,
        target: &NodeTarget,
        script: &Script,
        opts: &ExecOptions,
    ) -> Result<String> {
        let output = self.run(target, script, opts)?;
        if !output.success {
            return Err(Error::Command {
                node: target.name.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout_trimmed().to_string())
    }

    /// Execute and return just success/failure.
    fn run_status(
        &self,
        target: &NodeTarget,
        script: &Script,
        opts: &ExecOptions,
    ) -> Result<bool> {
        Ok(self.run(target, script, opts)?.success)
    }
}

//! OpenSSH-backed runner and its connection pool.
//!
//! Channels are multiplexed through ControlMaster sockets so repeated calls
//! against one node reuse a single TCP/auth handshake. The pool is an
//! explicit object with explicit teardown; nothing here is process-global.

use crate::error::{Error, Result};
use crate::runner::{ExecOptions, ExecOutput, NodeTarget, Runner};
use crate::script::Script;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Configuration for the OpenSSH client invocation.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// The ssh program to invoke.
    pub program: String,
    /// `ConnectTimeout` passed to ssh, in seconds.
    pub connect_timeout_secs: u64,
    /// `ControlPersist` for pooled sockets, in seconds.
    pub control_persist_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout_secs: 10,
            control_persist_secs: 60,
        }
    }
}

/// Pool of ControlMaster sockets, keyed by node name.
///
/// Created once and passed into [`SshRunner`]; call [`SshPool::close`] when
/// done. Drop performs the same teardown best-effort.
pub struct SshPool {
    socket_dir: PathBuf,
    active: Mutex<HashMap<String, (String, u16)>>,
    program: String,
}

impl SshPool {
    /// Create a pool storing control sockets under `socket_dir`.
    pub fn new(socket_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let socket_dir = socket_dir.into();
        std::fs::create_dir_all(&socket_dir)?;
        Ok(Self {
            socket_dir,
            active: Mutex::new(HashMap::new()),
            program: "ssh".to_string(),
        })
    }

    /// The control socket path for a node.
    #[must_use]
    pub fn control_path(&self, node_name: &str) -> PathBuf {
        self.socket_dir.join(format!("{node_name}.sock"))
    }

    fn register(&self, target: &NodeTarget) {
        self.active
            .lock()
            .unwrap()
            .insert(target.name.clone(), (target.login(), target.port));
    }

    /// Tear down the control socket for one node, if any.
    pub fn close_node(&self, node_name: &str) {
        let entry = self.active.lock().unwrap().remove(node_name);
        if let Some((login, port)) = entry {
            let path = self.control_path(node_name);
            let _ = Command::new(&self.program)
                .args(["-O", "exit", "-o"])
                .arg(format!("ControlPath={}", path.display()))
                .args(["-p", &port.to_string(), &login])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            let _ = std::fs::remove_file(&path);
        }
    }

    /// Tear down every pooled socket.
    pub fn close(&self) {
        let names: Vec<String> = self.active.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.close_node(&name);
        }
    }
}

impl Drop for SshPool {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`Runner`] implementation over the system OpenSSH client.
pub struct SshRunner {
    pool: SshPool,
    config: SshConfig,
}

impl SshRunner {
    /// Create a runner with default ssh configuration.
    pub fn new(pool: SshPool) -> Self {
        Self::with_config(pool, SshConfig::default())
    }

    /// Create a runner with explicit ssh configuration.
    pub fn with_config(mut pool: SshPool, config: SshConfig) -> Self {
        pool.program.clone_from(&config.program);
        Self { pool, config }
    }

    /// Access the underlying pool (for explicit teardown).
    #[must_use]
    pub fn pool(&self) -> &SshPool {
        &self.pool
    }

    fn ssh_args(&self, target: &NodeTarget, remote_command: &str) -> Vec<String> {
        let control_path = self.pool.control_path(&target.name);
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".into(),
            "ControlMaster=auto".into(),
            "-o".into(),
            format!("ControlPath={}", control_path.display()),
            "-o".into(),
            format!("ControlPersist={}", self.config.control_persist_secs),
            "-p".into(),
            target.port.to_string(),
            target.login(),
            "--".into(),
            remote_command.into(),
        ]
    }
}

/// Build the remote command line: the script body travels on stdin, the
/// positional arguments ride quoted on the command line.
fn remote_command(script: &Script, privileged: bool) -> String {
    let shell = if privileged { "sudo -n sh -s" } else { "sh -s" };
    let quoted = script.quoted_args();
    if quoted.is_empty() {
        shell.to_string()
    } else {
        format!("{shell} -- {quoted}")
    }
}

impl Runner for SshRunner {
    fn run(&self, target: &NodeTarget, script: &Script, opts: &ExecOptions) -> Result<ExecOutput> {
        if opts.dry_run {
            log::debug!("dry-run: skipping remote call on {}", target.name);
            return Ok(ExecOutput::synthetic());
        }

        self.pool.register(target);

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.ssh_args(target, &remote_command(script, opts.privileged)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!(
            "exec on {} (privileged={}, timeout={}s)",
            target.name,
            opts.privileged,
            opts.timeout.as_secs()
        );

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let payload = script.rendered();
        if let Some(mut stdin) = child.stdin.take() {
            // A write failure here means the remote shell never started;
            // the exit status below carries the real story.
            let _ = stdin.write_all(payload.as_bytes());
        }

        let stdout_handle = spawn_reader(child.stdout.take());
        let stderr_handle = spawn_reader(child.stderr.take());

        let status = match wait_with_deadline(&mut child, opts.timeout) {
            Ok(status) => status,
            Err(()) => {
                // The child is dead, so the readers hit EOF and finish.
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(Error::Timeout {
                    node: target.name.clone(),
                    seconds: opts.timeout.as_secs(),
                });
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        let exit_code = status.code().unwrap_or(crate::error::TRANSPORT_EXIT_CODE);

        if exit_code == crate::error::TRANSPORT_EXIT_CODE {
            // OpenSSH reserves 255 for its own failures; the remote command
            // never ran.
            return Err(Error::Transport {
                node: target.name.clone(),
                message: if stderr.trim().is_empty() {
                    "channel failed (exit 255)".to_string()
                } else {
                    stderr.trim().to_string()
                },
            });
        }

        Ok(ExecOutput {
            success: status.success(),
            stdout,
            stderr,
            exit_code,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Poll the child until it exits or the deadline passes; on timeout the
/// child is killed and `Err(())` returned.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::result::Result<std::process::ExitStatus, ()> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(());
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn target() -> NodeTarget {
        NodeTarget::new("node-a", "node-a.fleet.example", "ops")
    }

    fn pool(dir: &Path) -> SshPool {
        SshPool::new(dir).unwrap()
    }

    #[test]
    fn test_control_path_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path());
        assert_eq!(
            pool.control_path("node-a"),
            dir.path().join("node-a.sock")
        );
        assert_ne!(pool.control_path("node-a"), pool.control_path("node-b"));
    }

    #[test]
    fn test_remote_command_privilege_flag() {
        let script = Script::new("id").arg("u1001");
        assert_eq!(remote_command(&script, false), "sh -s -- u1001");
        assert_eq!(remote_command(&script, true), "sudo -n sh -s -- u1001");
        assert_eq!(remote_command(&Script::new("id"), false), "sh -s");
    }

    #[test]
    fn test_dry_run_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SshRunner::with_config(
            pool(dir.path()),
            SshConfig {
                program: "/nonexistent/ssh".into(),
                ..SshConfig::default()
            },
        );
        let out = runner
            .run(
                &target(),
                &Script::new("reboot"),
                &ExecOptions::live().dry_run(true),
            )
            .unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn test_spawn_failure_is_transport() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SshRunner::with_config(
            pool(dir.path()),
            SshConfig {
                program: "/nonexistent/ssh".into(),
                ..SshConfig::default()
            },
        );
        let err = runner
            .run(&target(), &Script::new("true"), &ExecOptions::live())
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), 255);
    }

    #[cfg(unix)]
    fn fake_ssh(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_command_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ssh(dir.path(), "cat >/dev/null\necho drift detected\nexit 3");
        let runner = SshRunner::with_config(
            pool(dir.path()),
            SshConfig {
                program,
                ..SshConfig::default()
            },
        );
        let out = runner
            .run(&target(), &Script::new("exit 3"), &ExecOptions::live())
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout_trimmed(), "drift detected");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_255_is_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ssh(
            dir.path(),
            "cat >/dev/null\necho 'connection refused' >&2\nexit 255",
        );
        let runner = SshRunner::with_config(
            pool(dir.path()),
            SshConfig {
                program,
                ..SshConfig::default()
            },
        );
        let err = runner
            .run(&target(), &Script::new("true"), &ExecOptions::live())
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("connection refused"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ssh(dir.path(), "sleep 30");
        let runner = SshRunner::with_config(
            pool(dir.path()),
            SshConfig {
                program,
                ..SshConfig::default()
            },
        );
        let started = Instant::now();
        let err = runner
            .run(
                &target(),
                &Script::new("true"),
                &ExecOptions::live().with_timeout(Duration::from_millis(300)),
            )
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, Error::Timeout { .. }));
    }
}

//! Test fake for the remote transport.
//!
//! Rules pair a script fragment with an argument fragment; the most
//! recently added matching rule wins, so tests can layer overrides on a
//! baseline. Anything unmatched reports exit 1 ("absent"/"inactive"),
//! which keeps happy-path tests explicit about what exists remotely.

use sshkit::{ExecOptions, ExecOutput, NodeTarget, Runner, Script};
use std::sync::Mutex;

struct Rule {
    script_frag: String,
    arg_frag: String,
    output: ExecOutput,
}

/// Scripted [`Runner`] for tests.
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a rule returning the given output.
    pub fn on(&self, script_frag: &str, arg_frag: &str, output: ExecOutput) {
        self.rules.lock().unwrap().push(Rule {
            script_frag: script_frag.to_string(),
            arg_frag: arg_frag.to_string(),
            output,
        });
    }

    /// Rule: succeed with the given stdout.
    pub fn ok(&self, script_frag: &str, arg_frag: &str, stdout: &str) {
        self.on(
            script_frag,
            arg_frag,
            ExecOutput {
                success: true,
                stdout: format!("{stdout}\n"),
                stderr: String::new(),
                exit_code: 0,
            },
        );
    }

    /// Rule: fail with the given exit code.
    pub fn fail(&self, script_frag: &str, arg_frag: &str, exit_code: i32) {
        self.on(
            script_frag,
            arg_frag,
            ExecOutput {
                success: false,
                stdout: String::new(),
                stderr: String::new(),
                exit_code,
            },
        );
    }

    /// Every haystack this runner was called with, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How many calls matched the given fragments.
    pub fn call_count(&self, script_frag: &str, arg_frag: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(script_frag) && c.contains(arg_frag))
            .count()
    }
}

/// Execute a script payload against the local `sh`, the same way the
/// transport feeds a remote one. Lets tests exercise the idempotency
/// guards that live in the script bodies themselves.
pub fn run_local(script: &Script) -> ExecOutput {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new("sh")
        .arg("-s")
        .arg("--")
        .args(script.arg_list())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("local sh is available");
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(script.rendered().as_bytes())
        .expect("script written");
    let output = child.wait_with_output().expect("sh completes");
    ExecOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    }
}

/// A runner scripted so the given Desired Configuration is fully
/// converged remotely: user present with the recorded UID, layout in
/// place, service files written, services active, modes correct.
pub fn converged_runner(config: &crate::desired::DesiredConfig) -> FakeRunner {
    let runner = FakeRunner::new();
    let user = config.user();
    let uid = config.uid().unwrap_or_default();
    let gid = config.gid().unwrap_or(uid);
    let base = config.base_path();

    runner.ok(
        "getent passwd",
        user,
        &format!("{user}:x:{uid}:{gid}::{base}:/bin/bash"),
    );
    runner.ok(
        "stat -c '%u %g %U %G'",
        base,
        &format!("{uid} {gid} {user} {}", config.web_group()),
    );
    for path in [
        base.to_string(),
        config.web_path().to_string(),
        config.mail_path().to_string(),
        config.get_or_empty("U_APP_PATH").to_string(),
        config.get_or_empty("U_LOG_PATH").to_string(),
        config.get_or_empty("U_RUN_PATH").to_string(),
        config.get_or_empty("U_PUBLIC_PATH").to_string(),
    ] {
        runner.ok("test -d", &path, "");
    }
    runner.ok("test -f", config.get_or_empty("PHP_POOL_FILE"), "");
    runner.ok("test -f", config.get_or_empty("WEB_SITE_FILE"), "");
    for service in [
        config.get_or_empty("WEB_SERVICE"),
        config.get_or_empty("PHP_FPM_SERVICE"),
        config.get_or_empty("MAIL_SERVICE"),
    ] {
        runner.ok("systemctl is-active", service, "");
    }
    // Shorter path first: the most recently added matching rule wins, and
    // the log path contains the web path as a prefix.
    runner.ok(
        "stat -c '%a'",
        config.web_path(),
        config.get_or_empty("WEB_DIR_MODE"),
    );
    runner.ok(
        "stat -c '%a'",
        config.get_or_empty("U_LOG_PATH"),
        config.get_or_empty("LOG_DIR_MODE"),
    );
    runner
}

impl Runner for FakeRunner {
    fn run(
        &self,
        _target: &NodeTarget,
        script: &Script,
        opts: &ExecOptions,
    ) -> sshkit::Result<ExecOutput> {
        let haystack = format!("{} :: {}", script.rendered(), script.arg_list().join(" "));
        self.calls.lock().unwrap().push(haystack.clone());

        if opts.dry_run {
            return Ok(ExecOutput::synthetic());
        }

        let rules = self.rules.lock().unwrap();
        for rule in rules.iter().rev() {
            if haystack.contains(&rule.script_frag) && haystack.contains(&rule.arg_frag) {
                return Ok(rule.output.clone());
            }
        }
        Ok(ExecOutput {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 1,
        })
    }
}

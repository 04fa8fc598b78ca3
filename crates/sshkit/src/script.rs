//! Script payloads and their rendering.
//!
//! A [`Script`] is an opaque POSIX-shell payload plus positional arguments.
//! The transport never interprets script content beyond two guarantees:
//! arguments are shell-quoted, and a fail-fast preamble is injected unless
//! the script already declares one.

/// A shell script payload with positional arguments.
#[derive(Debug, Clone)]
pub struct Script {
    body: String,
    args: Vec<String>,
}

impl Script {
    /// Create a script from a shell body.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument (becomes `$1`, `$2`, ... remotely).
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several positional arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The positional arguments, unquoted.
    #[must_use]
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// The positional arguments quoted for a POSIX shell command line.
    #[must_use]
    pub fn quoted_args(&self) -> String {
        shell_words::join(self.args.iter().map(String::as_str))
    }

    /// The payload sent to the remote shell's stdin.
    ///
    /// Injects `set -eu` unless the script already opts into fail-fast
    /// behavior with its own `set -e...` line.
    #[must_use]
    pub fn rendered(&self) -> String {
        if has_failfast(&self.body) {
            self.body.clone()
        } else {
            format!("set -eu\n{}", self.body)
        }
    }
}

/// Check whether a script body already declares fail-fast behavior.
///
/// Only the leading lines are inspected (shebang and comments skipped); a
/// `set -e` buried mid-script does not count as a declaration.
fn has_failfast(body: &str) -> bool {
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return line.starts_with("set -e") || line.starts_with("set -ue");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_injected() {
        let script = Script::new("mkdir -p /srv/web");
        assert!(script.rendered().starts_with("set -eu\n"));
        assert!(script.rendered().contains("mkdir -p /srv/web"));
    }

    #[test]
    fn test_preamble_not_duplicated() {
        let script = Script::new("set -eu\nmkdir -p /srv/web");
        assert_eq!(script.rendered(), "set -eu\nmkdir -p /srv/web");
    }

    #[test]
    fn test_preamble_skips_shebang_and_comments() {
        let script = Script::new("#!/bin/sh\n# provision layout\nset -e\nmkdir -p \"$1\"");
        assert!(!script.rendered().starts_with("set -eu\n#!"));
        assert_eq!(script.rendered(), "#!/bin/sh\n# provision layout\nset -e\nmkdir -p \"$1\"");
    }

    #[test]
    fn test_mid_script_set_does_not_count() {
        let script = Script::new("echo start\nset -e\necho end");
        assert!(script.rendered().starts_with("set -eu\n"));
    }

    #[test]
    fn test_args_are_quoted() {
        let script = Script::new("useradd \"$1\"")
            .arg("u1001")
            .arg("comment with spaces");
        assert_eq!(script.quoted_args(), "u1001 'comment with spaces'");
    }

    #[test]
    fn test_hostile_args_are_quoted() {
        let script = Script::new("rm -rf \"$1\"").arg("x; reboot");
        assert_eq!(script.quoted_args(), "'x; reboot'");
    }

    #[test]
    fn test_empty_args() {
        let script = Script::new("true");
        assert_eq!(script.quoted_args(), "");
        assert!(script.arg_list().is_empty());
    }
}

//! Error types for remote execution.
//!
//! Errors are split along the line the rest of the system cares about:
//! did the remote command *run and fail* (its exit code and output are
//! meaningful), or did the channel itself fail (no exit code exists, the
//! conventional 255 is reported instead).

use std::fmt;
use std::io;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code reported for transport-level failures, matching the OpenSSH
/// convention for "connection or usage error".
pub const TRANSPORT_EXIT_CODE: i32 = 255;

/// Categories of transport errors for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The channel failed: unreachable host, spawn failure, timeout.
    Transport,
    /// The remote command ran and returned non-zero.
    Command,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this category is worth retrying at the caller's discretion.
    ///
    /// The transport itself never retries; callers that choose to must
    /// bound their attempts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport)
    }

    /// User-facing description of the category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transport => "Remote channel failure",
            Self::Command => "Remote command failed",
            Self::Other => "Unexpected error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while executing a script on a remote node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel to the node could not be established or broke mid-call.
    #[error("transport failure on {node}: {message}")]
    Transport {
        /// Node name.
        node: String,
        /// What went wrong.
        message: String,
    },

    /// The call exceeded its bounded timeout and the child was killed.
    #[error("command on {node} timed out after {seconds}s")]
    Timeout {
        /// Node name.
        node: String,
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// The remote command ran and returned a non-zero exit code.
    #[error("command on {node} exited {exit_code}: {stderr}")]
    Command {
        /// Node name.
        node: String,
        /// Exit code reported by the remote shell.
        exit_code: i32,
        /// Captured stdout, kept for diagnosis.
        stdout: String,
        /// Captured stderr, trimmed.
        stderr: String,
    },

    /// Failed to spawn or talk to the local ssh process.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// The ssh program being invoked.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Get the error category for retry decisions.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transport { .. } | Error::Timeout { .. } | Error::Spawn { .. } => {
                ErrorCategory::Transport
            }
            Error::Command { .. } => ErrorCategory::Command,
        }
    }

    /// Whether this error is transport-level and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// The exit code to report for this failure.
    ///
    /// Transport-level failures have no real exit code; 255 stands in.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Command { exit_code, .. } => *exit_code,
            _ => TRANSPORT_EXIT_CODE,
        }
    }

    /// Captured remote output, if the command got far enough to produce any.
    #[must_use]
    pub fn remote_output(&self) -> Option<&str> {
        match self {
            Error::Command { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

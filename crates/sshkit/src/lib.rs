//! # sshkit
//!
//! Remote script execution over the system OpenSSH client.
//!
//! The crate's job is narrow: take an opaque POSIX-shell payload, run it on
//! a named node, and report exactly one of three outcomes:
//!
//! - the command ran and exited zero ([`ExecOutput`] with `success`)
//! - the command ran and exited non-zero (output + real exit code preserved)
//! - the channel itself failed (no exit code exists; 255 stands in, and the
//!   error is flagged retryable)
//!
//! ## Guarantees
//!
//! - Positional arguments are always shell-quoted.
//! - A `set -eu` fail-fast preamble is injected unless the script declares
//!   its own.
//! - Every call carries a bounded timeout; a timed-out child is killed and
//!   reported as a transport failure, never silently retried.
//! - Privileged execution is a flag (`sudo -n`), not a separate code path.
//! - Dry-run performs no network action and returns synthetic success.
//!
//! ## Pooling
//!
//! [`SshPool`] owns ControlMaster sockets keyed by node name and is passed
//! into [`SshRunner`] explicitly. Teardown is explicit (`close`) with a
//! best-effort Drop fallback.
//!
//! Higher layers depend on the [`Runner`] trait, keeping the transport
//! swappable in tests.

pub mod error;
pub mod runner;
pub mod script;
pub mod ssh;

pub use error::{Error, ErrorCategory, Result, TRANSPORT_EXIT_CODE};
pub use runner::{DEFAULT_TIMEOUT, ExecOptions, ExecOutput, NodeTarget, Runner};
pub use script::Script;
pub use ssh::{SshConfig, SshPool, SshRunner};

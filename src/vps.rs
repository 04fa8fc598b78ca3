//! VPS provisioning client.
//!
//! A thin REST client for the hosting provider: create a server, poll its
//! status. Transport-level failures retry with capped exponential backoff
//! and a fixed attempt ceiling; HTTP error statuses do not retry (the
//! request reached the API and was refused).

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed retry ceiling.
const MAX_ATTEMPTS: u32 = 4;

/// Base delay for the backoff schedule.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A provisioned (or provisioning) server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl ServerInfo {
    /// Whether the provider reports the server as usable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active" || self.status == "running"
    }
}

#[derive(Debug, Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    plan: &'a str,
    region: &'a str,
}

/// REST client for the VPS provider.
pub struct VpsClient {
    agent: ureq::Agent,
    endpoint: String,
    token: String,
}

impl VpsClient {
    /// Create a client for the given API endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn servers_url(&self) -> String {
        format!("{}/v1/servers", self.endpoint)
    }

    fn server_url(&self, id: &str) -> String {
        format!("{}/v1/servers/{id}", self.endpoint)
    }

    /// Create a server and return the provider's record of it.
    pub fn create_server(&self, name: &str, plan: &str, region: &str) -> Result<ServerInfo> {
        let body = CreateServerRequest { name, plan, region };
        self.with_retry("create server", || {
            let info: ServerInfo = self
                .agent
                .post(&self.servers_url())
                .header("Authorization", &format!("Bearer {}", self.token))
                .send_json(&body)?
                .body_mut()
                .read_json()?;
            Ok(info)
        })
    }

    /// Fetch a server's current status.
    pub fn server_status(&self, id: &str) -> Result<ServerInfo> {
        self.with_retry("fetch server status", || {
            let info: ServerInfo = self
                .agent
                .get(&self.server_url(id))
                .header("Authorization", &format!("Bearer {}", self.token))
                .call()?
                .body_mut()
                .read_json()?;
            Ok(info)
        })
    }

    /// Run a request with the bounded retry policy.
    fn with_retry<T>(
        &self,
        what: &str,
        mut attempt: impl FnMut() -> std::result::Result<T, ureq::Error>,
    ) -> Result<T> {
        let mut last_err = None;
        for (index, delay) in backoff_schedule(MAX_ATTEMPTS).into_iter().enumerate() {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match attempt() {
                Ok(value) => return Ok(value),
                Err(ureq::Error::StatusCode(code)) => {
                    // The API answered; retrying the same request is noise.
                    bail!("{what} failed: HTTP {code}");
                }
                Err(e) => {
                    log::warn!("{what}: attempt {} failed: {e}", index + 1);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or_else(
            || anyhow::anyhow!("{what} failed"),
            anyhow::Error::from,
        ))
        .with_context(|| format!("{what} failed after {MAX_ATTEMPTS} attempts"))
    }
}

/// Delays before each attempt: 0, base, 2*base, 4*base, ...
fn backoff_schedule(attempts: u32) -> Vec<Duration> {
    (0..attempts)
        .map(|n| {
            if n == 0 {
                Duration::ZERO
            } else {
                BACKOFF_BASE * 2u32.pow(n - 1)
            }
        })
        .collect()
}

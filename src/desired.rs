//! The Desired Configuration: the authoritative ~50-key description of a
//! tenant's intended environment on its node.
//!
//! Keys are fixed across OS families; only values vary. The validator and
//! the reconciliation engine index into this map by key name, so the key
//! set's stability is an invariant, not a convention.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys holding generated secrets. Once generated these are preserved
/// across regeneration; running services authenticate with them.
pub const CREDENTIAL_KEYS: [&str; 5] =
    ["DB_PASS", "MAIL_PASS", "FTP_PASS", "PANEL_PASS", "APP_SECRET"];

/// Minimum plausible key count for a stored record; fewer is drift.
pub const MIN_KEYS: usize = 40;

/// A tenant's desired-state variable set.
///
/// Backed by a `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredConfig(BTreeMap<String, String>);

impl DesiredConfig {
    /// Create an empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a key, falling back to empty.
    #[must_use]
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Whether a key is present with a non-empty value.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterate entries in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The credential values currently present, keyed by credential key.
    /// Used to preserve secrets across regeneration.
    #[must_use]
    pub fn credentials(&self) -> BTreeMap<String, String> {
        CREDENTIAL_KEYS
            .iter()
            .filter_map(|k| self.get(k).map(|v| ((*k).to_string(), v.to_string())))
            .collect()
    }

    // Typed accessors for the keys other components navigate by.

    /// Tenant system user name.
    #[must_use]
    pub fn user(&self) -> &str {
        self.get_or_empty("UUSER")
    }

    /// Tenant UID.
    #[must_use]
    pub fn uid(&self) -> Option<u32> {
        self.get("U_UID").and_then(|v| v.parse().ok())
    }

    /// Tenant GID.
    #[must_use]
    pub fn gid(&self) -> Option<u32> {
        self.get("U_GID").and_then(|v| v.parse().ok())
    }

    /// Base directory of the tenant tree.
    #[must_use]
    pub fn base_path(&self) -> &str {
        self.get_or_empty("U_PATH")
    }

    /// Web directory.
    #[must_use]
    pub fn web_path(&self) -> &str {
        self.get_or_empty("U_WEB_PATH")
    }

    /// Mail directory.
    #[must_use]
    pub fn mail_path(&self) -> &str {
        self.get_or_empty("U_MAIL_PATH")
    }

    /// Group the web server runs as.
    #[must_use]
    pub fn web_group(&self) -> &str {
        self.get_or_empty("WEB_GROUP")
    }

    /// Whether this tenant is the node's own administrative identity.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.get("IS_ADMIN") == Some("yes")
    }
}

impl FromIterator<(String, String)> for DesiredConfig {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

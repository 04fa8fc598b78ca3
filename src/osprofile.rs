//! OS-family profiles.
//!
//! This table is the single place OS differences are encoded: PHP runtime
//! version and pool location, web-server group, site-file directory, and
//! package mirror. Every other component treats the resulting values as
//! opaque strings in the Desired Configuration.

use serde::{Deserialize, Serialize};

/// Supported OS families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Debian,
    Alpine,
    Arch,
    Rhel,
}

/// The reference family assumed by static defaults.
pub const REFERENCE_FAMILY: OsFamily = OsFamily::Debian;

impl OsFamily {
    /// Stable string form used inside the Desired Configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Alpine => "alpine",
            Self::Arch => "arch",
            Self::Rhel => "rhel",
        }
    }

    /// Parse from an os-release `ID`/`ID_LIKE` token.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" | "raspbian" => Some(Self::Debian),
            "alpine" => Some(Self::Alpine),
            "arch" | "archarm" | "manjaro" => Some(Self::Arch),
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" => Some(Self::Rhel),
            _ => None,
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("unknown OS family: {s}"))
    }
}

/// A detected OS fingerprint from a live probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsFingerprint {
    pub family: OsFamily,
    pub codename: String,
}

/// Per-family service locations and defaults.
#[derive(Debug, Clone)]
pub struct OsProfile {
    pub php_version: &'static str,
    pub php_pool_dir: &'static str,
    pub php_fpm_service: &'static str,
    pub web_group: &'static str,
    pub web_sites_dir: &'static str,
    pub mirror: &'static str,
}

/// Look up the profile for a family.
#[must_use]
pub fn profile(family: OsFamily) -> OsProfile {
    match family {
        OsFamily::Debian => OsProfile {
            php_version: "8.2",
            php_pool_dir: "/etc/php/8.2/fpm/pool.d",
            php_fpm_service: "php8.2-fpm",
            web_group: "www-data",
            web_sites_dir: "/etc/nginx/sites-enabled",
            mirror: "http://deb.debian.org/debian",
        },
        OsFamily::Alpine => OsProfile {
            php_version: "82",
            php_pool_dir: "/etc/php82/php-fpm.d",
            php_fpm_service: "php-fpm82",
            web_group: "nginx",
            web_sites_dir: "/etc/nginx/http.d",
            mirror: "https://dl-cdn.alpinelinux.org/alpine",
        },
        OsFamily::Arch => OsProfile {
            php_version: "8",
            php_pool_dir: "/etc/php/php-fpm.d",
            php_fpm_service: "php-fpm",
            web_group: "http",
            web_sites_dir: "/etc/nginx/conf.d",
            mirror: "https://geo.mirror.pkgbuild.com",
        },
        OsFamily::Rhel => OsProfile {
            php_version: "8.2",
            php_pool_dir: "/etc/php-fpm.d",
            php_fpm_service: "php-fpm",
            web_group: "nginx",
            web_sites_dir: "/etc/nginx/conf.d",
            mirror: "https://dl.fedoraproject.org/pub/epel",
        },
    }
}

/// Parse `/etc/os-release` output into a fingerprint.
///
/// Falls back from `ID` to the first recognized `ID_LIKE` token, the way
/// derivatives (ubuntu, rocky) declare their lineage.
#[must_use]
pub fn parse_os_release(output: &str) -> Option<OsFingerprint> {
    let mut id = None;
    let mut id_like = None;
    let mut codename = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(unquote(value));
        } else if let Some(value) = line.strip_prefix("ID_LIKE=") {
            id_like = Some(unquote(value));
        } else if let Some(value) = line.strip_prefix("VERSION_CODENAME=") {
            codename = Some(unquote(value));
        }
    }

    let family = id
        .as_deref()
        .and_then(OsFamily::from_id)
        .or_else(|| {
            id_like
                .as_deref()?
                .split_whitespace()
                .find_map(OsFamily::from_id)
        })?;

    Some(OsFingerprint {
        family,
        codename: codename.unwrap_or_default(),
    })
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

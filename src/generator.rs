//! Desired Configuration generation.
//!
//! A pure function of (node, domain, overrides, OS hint, UID probe) plus a
//! random source for credential fields. The computation order is
//! load-bearing: later steps overwrite earlier ones.
//!
//! 1. Static defaults assuming the reference OS.
//! 2. Detected-OS override from a live probe.
//! 3. Caller-supplied explicit overrides.
//! 4. Dynamic fields: admin identity or gap-filling UID allocation, and
//!    credential generation (existing credentials are never regenerated).
//! 5. The OS-family table.
//! 6. Derived fields composed from everything above.

use rand::distributions::Alphanumeric;
use rand::{CryptoRng, Rng};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::desired::{CREDENTIAL_KEYS, DesiredConfig};
use crate::osprofile::{self, OsFingerprint, REFERENCE_FAMILY};
use crate::store::NodeRecord;

/// UID of the node's own administrative identity; also the floor below
/// which tenant UIDs are never allocated.
pub const ADMIN_UID: u32 = 1000;

/// Username of the administrative identity.
pub const ADMIN_USER: &str = "admin";

/// Inputs to one generation run.
pub struct GenerateRequest<'a> {
    pub node: &'a NodeRecord,
    pub domain: &'a str,
    pub overrides: &'a BTreeMap<String, String>,
    pub os_hint: Option<&'a OsFingerprint>,
    /// UIDs currently present on the node, from a remote probe.
    /// `None` means the probe failed; allocation falls back to admin+1.
    pub existing_uids: Option<&'a [u32]>,
}

/// Generate the full Desired Configuration for a tenant.
pub fn generate<R: Rng + CryptoRng>(req: &GenerateRequest, rng: &mut R) -> DesiredConfig {
    let mut config = DesiredConfig::new();

    // Step 1: static defaults (reference OS values; corrected in step 5).
    config.set("DOMAIN", req.domain);
    config.set("GROUP", &req.node.group);
    config.set("NODE", &req.node.name);
    config.set("NODE_FQDN", &req.node.fqdn);
    config.set("ADMIN_USER", ADMIN_USER);
    config.set("ADMIN_UID", ADMIN_UID.to_string());
    config.set("U_SHELL", "/bin/bash");
    config.set("HTTP_PORT", "80");
    config.set("HTTPS_PORT", "443");
    config.set("WEB_SERVICE", "nginx");
    config.set("MAIL_SERVICE", "postfix");
    config.set("DB_HOST", "localhost");
    config.set("PHP_MAX_CHILDREN", "10");
    config.set("PHP_MEMORY_LIMIT", "256M");
    config.set("WEB_DIR_MODE", "751");
    config.set("LOG_DIR_MODE", "750");
    config.set("OS_FAMILY", REFERENCE_FAMILY.as_str());
    config.set("OS_CODENAME", "bookworm");

    // Step 2: detected OS, if the caller probed one.
    if let Some(hint) = req.os_hint {
        config.set("OS_FAMILY", hint.family.as_str());
        if !hint.codename.is_empty() {
            config.set("OS_CODENAME", &hint.codename);
        }
    }

    // Step 3: explicit overrides.
    for (key, value) in req.overrides {
        config.set(key, value);
    }

    // Step 4: dynamic identity and credentials.
    let is_admin = req.domain == req.node.fqdn;
    config.set("IS_ADMIN", if is_admin { "yes" } else { "no" });
    if !config.has("U_UID") {
        let uid = if is_admin {
            ADMIN_UID
        } else {
            match req.existing_uids {
                Some(uids) => allocate_uid(uids, ADMIN_UID),
                None => {
                    log::warn!(
                        "UID probe unavailable for {}, defaulting to {}",
                        req.node.name,
                        ADMIN_UID + 1
                    );
                    ADMIN_UID + 1
                }
            }
        };
        config.set("U_UID", uid.to_string());
    }
    if !config.has("U_GID") {
        let gid = config.get_or_empty("U_UID").to_string();
        config.set("U_GID", gid);
    }
    if !config.has("UUSER") {
        let user = if is_admin {
            ADMIN_USER.to_string()
        } else {
            format!("u{}", config.get_or_empty("U_UID"))
        };
        config.set("UUSER", user);
    }
    for key in CREDENTIAL_KEYS {
        if !config.has(key) {
            let len = if key == "APP_SECRET" { 32 } else { 24 };
            config.set(key, random_secret(rng, len));
        }
    }

    // Step 5: the OS-family table. These six keys always come from the
    // table; OS differences are encoded nowhere else.
    let family = config
        .get("OS_FAMILY")
        .and_then(osprofile::OsFamily::from_id)
        .unwrap_or(REFERENCE_FAMILY);
    let profile = osprofile::profile(family);
    config.set("OS_FAMILY", family.as_str());
    config.set("PHP_VERSION", profile.php_version);
    config.set("PHP_POOL_DIR", profile.php_pool_dir);
    config.set("PHP_FPM_SERVICE", profile.php_fpm_service);
    config.set("WEB_GROUP", profile.web_group);
    config.set("WEB_SITES_DIR", profile.web_sites_dir);
    config.set("OS_MIRROR", profile.mirror);

    // Step 6: derived fields. Each is composed from the map as it stands,
    // so an explicit override of an upstream key (say U_PATH) flows into
    // everything derived from it; explicit overrides of the derived key
    // itself stay authoritative.
    let derive = |config: &mut DesiredConfig, key: &str, value: String| {
        if !req.overrides.contains_key(key) {
            config.set(key, value);
        }
    };

    let base = format!("/home/{}", config.user());
    derive(&mut config, "U_PATH", base);
    let web = format!("{}/web", config.base_path());
    derive(&mut config, "U_WEB_PATH", web);
    let app = format!("{}/app", config.web_path());
    derive(&mut config, "U_APP_PATH", app);
    let public = format!("{}/public", config.get_or_empty("U_APP_PATH"));
    derive(&mut config, "U_PUBLIC_PATH", public);
    let log_path = format!("{}/log", config.web_path());
    derive(&mut config, "U_LOG_PATH", log_path);
    let run_path = format!("{}/run", config.web_path());
    derive(&mut config, "U_RUN_PATH", run_path);
    let mail = format!("{}/mail", config.base_path());
    derive(&mut config, "U_MAIL_PATH", mail);
    derive(
        &mut config,
        "U_BACKUP_PATH",
        format!("/var/backups/vhost/{}", req.domain),
    );
    derive(&mut config, "WEB_ALIAS", format!("www.{}", req.domain));
    derive(&mut config, "MAIL_DOMAIN", format!("mail.{}", req.domain));
    let site_file = format!(
        "{}/{}.conf",
        config.get_or_empty("WEB_SITES_DIR"),
        req.domain
    );
    derive(&mut config, "WEB_SITE_FILE", site_file);
    let pool_file = format!(
        "{}/{}.conf",
        config.get_or_empty("PHP_POOL_DIR"),
        req.domain
    );
    derive(&mut config, "PHP_POOL_FILE", pool_file);

    let db = db_name(req.domain);
    derive(&mut config, "DB_NAME", db.clone());
    derive(&mut config, "DB_USER", db.clone());
    derive(
        &mut config,
        "DB_CREATE_SQL",
        format!("CREATE DATABASE IF NOT EXISTS `{db}` CHARACTER SET utf8mb4;"),
    );
    let grant = format!(
        "GRANT ALL PRIVILEGES ON `{db}`.* TO '{}'@'localhost' IDENTIFIED BY '{}';",
        config.get_or_empty("DB_USER"),
        config.get_or_empty("DB_PASS"),
    );
    derive(&mut config, "DB_GRANT_SQL", grant);
    let mysql_cmd = format!(
        "mysql -u{} -h{} {db}",
        config.get_or_empty("DB_USER"),
        config.get_or_empty("DB_HOST"),
    );
    derive(&mut config, "MYSQL_CMD", mysql_cmd);

    config
}

/// Allocate the lowest unused UID that fills a gap above `floor`.
///
/// Repeated provision/deprovision cycles reuse holes instead of
/// monotonically exhausting the UID space.
#[must_use]
pub fn allocate_uid(existing: &[u32], floor: u32) -> u32 {
    let mut taken: Vec<u32> = existing.iter().copied().filter(|&u| u > floor).collect();
    taken.sort_unstable();
    taken.dedup();

    let mut candidate = floor + 1;
    for uid in taken {
        if uid == candidate {
            candidate += 1;
        } else if uid > candidate {
            break;
        }
    }
    candidate
}

/// Database name derived from a domain: non-alphanumeric characters become
/// underscores, truncated to the MySQL identifier limit.
#[must_use]
pub fn db_name(domain: &str) -> String {
    let name: String = domain
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name.chars().take(64).collect()
}

/// Whether a string is a plausible fully-qualified domain name.
#[must_use]
pub fn valid_domain(domain: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$")
            .expect("domain regex is valid")
    });
    domain.len() <= 253 && re.is_match(domain)
}

fn random_secret<R: Rng + CryptoRng>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn node() -> NodeRecord {
        NodeRecord {
            name: "node-a".into(),
            group: "fleet".into(),
            hostname: "10.0.0.5".into(),
            ssh_user: "ops".into(),
            ssh_port: 22,
            fqdn: "node-a.fleet.example".into(),
            os: None,
        }
    }

    fn generate_with(
        domain: &str,
        overrides: &BTreeMap<String, String>,
        os_hint: Option<&OsFingerprint>,
        uids: Option<&[u32]>,
        seed: u64,
    ) -> DesiredConfig {
        let node = node();
        let req = GenerateRequest {
            node: &node,
            domain,
            overrides,
            os_hint,
            existing_uids: uids,
        };
        generate(&req, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_uid_gap_filling() {
        assert_eq!(allocate_uid(&[1001, 1002, 1004, 1005], 1000), 1003);
        assert_eq!(allocate_uid(&[], 1000), 1001);
        assert_eq!(allocate_uid(&[1001], 1000), 1002);
        assert_eq!(allocate_uid(&[1002], 1000), 1001);
        // UIDs at or below the floor never count.
        assert_eq!(allocate_uid(&[0, 33, 1000], 1000), 1001);
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let overrides = BTreeMap::new();
        let a = generate_with("mail.example.com", &overrides, None, Some(&[]), 7);
        let b = generate_with("mail.example.com", &overrides, None, Some(&[]), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_set_invariant_across_families() {
        let overrides = BTreeMap::new();
        let debian = generate_with("example.com", &overrides, None, Some(&[]), 1);
        for family in [
            crate::osprofile::OsFamily::Alpine,
            crate::osprofile::OsFamily::Arch,
            crate::osprofile::OsFamily::Rhel,
        ] {
            let hint = OsFingerprint {
                family,
                codename: String::new(),
            };
            let other = generate_with("example.com", &overrides, Some(&hint), Some(&[]), 1);
            let a: Vec<&str> = debian.keys().collect();
            let b: Vec<&str> = other.keys().collect();
            assert_eq!(a, b, "key set differs for {family}");
        }
    }

    #[test]
    fn test_key_count_is_full() {
        let config = generate_with("example.com", &BTreeMap::new(), None, Some(&[]), 1);
        assert_eq!(config.len(), 50);
        assert!(config.len() >= crate::desired::MIN_KEYS);
    }

    #[test]
    fn test_regular_tenant_identity() {
        let config = generate_with("mail.example.com", &BTreeMap::new(), None, Some(&[]), 1);
        assert_eq!(config.user(), "u1001");
        assert_eq!(config.uid(), Some(1001));
        assert_eq!(config.get("IS_ADMIN"), Some("no"));
        assert_eq!(config.base_path(), "/home/u1001");
        assert_eq!(config.get("U_PUBLIC_PATH"), Some("/home/u1001/web/app/public"));
    }

    #[test]
    fn test_admin_identity_when_domain_is_fqdn() {
        let config = generate_with(
            "node-a.fleet.example",
            &BTreeMap::new(),
            None,
            Some(&[1001, 1002]),
            1,
        );
        assert_eq!(config.user(), ADMIN_USER);
        assert_eq!(config.uid(), Some(ADMIN_UID));
        assert_eq!(config.get("IS_ADMIN"), Some("yes"));
    }

    #[test]
    fn test_probe_failure_falls_back_to_admin_plus_one() {
        let config = generate_with("example.com", &BTreeMap::new(), None, None, 1);
        assert_eq!(config.uid(), Some(ADMIN_UID + 1));
    }

    #[test]
    fn test_credentials_preserved_from_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("DB_PASS".to_string(), "keep-me".to_string());
        let config = generate_with("example.com", &overrides, None, Some(&[]), 1);
        assert_eq!(config.get("DB_PASS"), Some("keep-me"));
        // Others are freshly generated and non-empty.
        assert!(config.has("MAIL_PASS"));
        assert!(config.has("APP_SECRET"));
        assert_ne!(config.get("MAIL_PASS"), Some("keep-me"));
    }

    #[test]
    fn test_os_table_applies_after_hint() {
        let hint = OsFingerprint {
            family: crate::osprofile::OsFamily::Alpine,
            codename: "3.20".into(),
        };
        let config = generate_with("example.com", &BTreeMap::new(), Some(&hint), Some(&[]), 1);
        assert_eq!(config.get("OS_FAMILY"), Some("alpine"));
        assert_eq!(config.get("PHP_POOL_DIR"), Some("/etc/php82/php-fpm.d"));
        assert_eq!(config.web_group(), "nginx");
        assert_eq!(
            config.get("PHP_POOL_FILE"),
            Some("/etc/php82/php-fpm.d/example.com.conf")
        );
    }

    #[test]
    fn test_db_name_sanitization() {
        assert_eq!(db_name("mail.example.com"), "mail_example_com");
        assert_eq!(db_name("my-shop.example.org"), "my_shop_example_org");
    }

    #[test]
    fn test_derived_respects_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("U_PATH".to_string(), "/srv/tenants/example".to_string());
        let config = generate_with("example.com", &overrides, None, Some(&[]), 1);
        assert_eq!(config.base_path(), "/srv/tenants/example");
        // Downstream derivations compose from the override.
        assert_eq!(config.web_path(), "/srv/tenants/example/web");
    }

    #[test]
    fn test_valid_domain() {
        assert!(valid_domain("example.com"));
        assert!(valid_domain("mail.example.com"));
        assert!(valid_domain("a-b.example.co.uk"));
        assert!(!valid_domain("example"));
        assert!(!valid_domain("-bad.example.com"));
        assert!(!valid_domain("exa mple.com"));
        assert!(!valid_domain(""));
    }
}

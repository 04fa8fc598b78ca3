//! Generated remote artifacts.
//!
//! Rendering is byte-stable for a given Desired Configuration so the
//! validator can compare remote content against it and the reconciler can
//! rewrite files idempotently.

use crate::desired::DesiredConfig;

/// The PHP-FPM pool file for a tenant.
///
/// Pool-name header plus `user`/`group` directives are the compatibility
/// floor; the rest is tuning from the config map.
#[must_use]
pub fn pool_file(config: &DesiredConfig) -> String {
    let domain = config.get_or_empty("DOMAIN");
    let user = config.user();
    let socket = format!("{}/php.sock", config.get_or_empty("U_RUN_PATH"));
    format!(
        r"[{domain}]
user = {user}
group = {user}
listen = {socket}
listen.owner = {user}
listen.group = {web_group}
listen.mode = 0660
pm = dynamic
pm.max_children = {max_children}
pm.start_servers = 2
pm.min_spare_servers = 1
pm.max_spare_servers = 4
php_admin_value[memory_limit] = {memory_limit}
php_admin_value[error_log] = {log_path}/php-error.log
php_admin_flag[log_errors] = on
",
        web_group = config.web_group(),
        max_children = config.get_or_empty("PHP_MAX_CHILDREN"),
        memory_limit = config.get_or_empty("PHP_MEMORY_LIMIT"),
        log_path = config.get_or_empty("U_LOG_PATH"),
    )
}

/// The web-server site file: a plain HTTP vhost block plus a `www.`
/// redirect block.
#[must_use]
pub fn site_file(config: &DesiredConfig) -> String {
    let domain = config.get_or_empty("DOMAIN");
    format!(
        r"server {{
    listen {http_port};
    server_name {domain};
    root {public};

    access_log {log_path}/access.log;
    error_log {log_path}/error.log;

    index index.php index.html;

    location / {{
        try_files $uri $uri/ /index.php?$args;
    }}

    location ~ \.php$ {{
        include fastcgi_params;
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
        fastcgi_pass unix:{run_path}/php.sock;
    }}
}}

server {{
    listen {http_port};
    server_name {alias};
    return 301 http://{domain}$request_uri;
}}
",
        http_port = config.get_or_empty("HTTP_PORT"),
        public = config.get_or_empty("U_PUBLIC_PATH"),
        log_path = config.get_or_empty("U_LOG_PATH"),
        run_path = config.get_or_empty("U_RUN_PATH"),
        alias = config.get_or_empty("WEB_ALIAS"),
    )
}

/// Remote backup archive path for a migration started at `stamp`
/// (`YYYYmmddHHMMSS`). Lives under the backup path, outside the tenant
/// tree, so migration steps cannot delete it.
#[must_use]
pub fn backup_archive_path(config: &DesiredConfig, stamp: &str) -> String {
    format!(
        "{}/pre-migration-{stamp}.tar.gz",
        config.get_or_empty("U_BACKUP_PATH")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DesiredConfig {
        let mut c = DesiredConfig::new();
        c.set("DOMAIN", "example.com");
        c.set("UUSER", "u1001");
        c.set("WEB_GROUP", "www-data");
        c.set("WEB_ALIAS", "www.example.com");
        c.set("HTTP_PORT", "80");
        c.set("U_PUBLIC_PATH", "/home/u1001/web/app/public");
        c.set("U_LOG_PATH", "/home/u1001/web/log");
        c.set("U_RUN_PATH", "/home/u1001/web/run");
        c.set("U_BACKUP_PATH", "/var/backups/vhost/example.com");
        c.set("PHP_MAX_CHILDREN", "10");
        c.set("PHP_MEMORY_LIMIT", "256M");
        c
    }

    #[test]
    fn test_pool_file_header_and_identity() {
        let pool = pool_file(&config());
        assert!(pool.starts_with("[example.com]\n"));
        assert!(pool.contains("user = u1001"));
        assert!(pool.contains("group = u1001"));
        assert!(pool.contains("listen = /home/u1001/web/run/php.sock"));
        assert!(pool.contains("listen.group = www-data"));
    }

    #[test]
    fn test_site_file_has_vhost_and_redirect() {
        let site = site_file(&config());
        assert!(site.contains("server_name example.com;"));
        assert!(site.contains("root /home/u1001/web/app/public;"));
        assert!(site.contains("server_name www.example.com;"));
        assert!(site.contains("return 301 http://example.com$request_uri;"));
    }

    #[test]
    fn test_rendering_is_stable() {
        assert_eq!(pool_file(&config()), pool_file(&config()));
        assert_eq!(site_file(&config()), site_file(&config()));
    }

    #[test]
    fn test_backup_archive_path_outside_tree() {
        let path = backup_archive_path(&config(), "20260806120000");
        assert_eq!(
            path,
            "/var/backups/vhost/example.com/pre-migration-20260806120000.tar.gz"
        );
        assert!(!path.starts_with("/home/u1001"));
    }
}

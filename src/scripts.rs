//! Shell payloads for remote probes and repairs.
//!
//! Everything here must be safe to re-run: mutations are check-then-act,
//! never blind creation. Values travel as positional arguments (quoted by
//! the transport) or embedded with single-quote escaping for file content.

use sshkit::Script;

// ============================================================================
// Probes (read-only)
// ============================================================================

/// `uid gid user group` of a path's owner, or non-zero if it is missing.
#[must_use]
pub fn stat_owner(path: &str) -> Script {
    Script::new("stat -c '%u %g %U %G' \"$1\"").arg(path)
}

/// Octal mode of a path.
#[must_use]
pub fn stat_mode(path: &str) -> Script {
    Script::new("stat -c '%a' \"$1\"").arg(path)
}

/// `passwd` entry of a user (`name:x:uid:gid:...`), non-zero if absent.
#[must_use]
pub fn user_entry(user: &str) -> Script {
    Script::new("getent passwd \"$1\"").arg(user)
}

/// Every UID at or above the given floor, one per line.
#[must_use]
pub fn list_uids(floor: u32) -> Script {
    Script::new("getent passwd | awk -F: -v min=\"$1\" '$3 >= min { print $3 }'")
        .arg(floor.to_string())
}

/// Zero iff the directory exists.
#[must_use]
pub fn dir_exists(path: &str) -> Script {
    Script::new("test -d \"$1\"").arg(path)
}

/// Zero iff the file exists.
#[must_use]
pub fn file_exists(path: &str) -> Script {
    Script::new("test -f \"$1\"").arg(path)
}

/// File content.
#[must_use]
pub fn cat_file(path: &str) -> Script {
    Script::new("cat \"$1\"").arg(path)
}

/// Zero iff the service is active.
#[must_use]
pub fn service_active(service: &str) -> Script {
    Script::new("systemctl is-active --quiet \"$1\"").arg(service)
}

/// The node's `/etc/os-release`.
#[must_use]
pub fn os_release() -> Script {
    Script::new("cat /etc/os-release")
}

// ============================================================================
// Mutations (idempotent, privileged)
// ============================================================================

/// Create the tenant user unless it already exists.
#[must_use]
pub fn create_user(user: &str, uid: u32, gid: u32, home: &str, shell: &str) -> Script {
    Script::new(
        r#"user="$1"; uid="$2"; gid="$3"; home="$4"; shell="$5"
if ! getent passwd "$user" >/dev/null 2>&1; then
    getent group "$gid" >/dev/null 2>&1 || groupadd -g "$gid" "$user"
    useradd -u "$uid" -g "$gid" -d "$home" -s "$shell" -m "$user"
fi"#,
    )
    .arg(user)
    .arg(uid.to_string())
    .arg(gid.to_string())
    .arg(home)
    .arg(shell)
}

/// Create every missing directory in the list.
#[must_use]
pub fn create_layout(paths: &[String]) -> Script {
    Script::new(
        r#"for dir in "$@"; do
    [ -d "$dir" ] || mkdir -p "$dir"
done"#,
    )
    .args(paths.iter().cloned())
}

/// Write file content, creating parent directories. Content is embedded
/// with single-quote escaping; the write is skipped when the file already
/// matches.
#[must_use]
pub fn write_file(path: &str, content: &str) -> Script {
    let body = format!(
        r#"path="$1"
payload='{}'
if [ -f "$path" ] && [ "$(cat "$path")" = "$payload" ]; then
    exit 0
fi
mkdir -p "$(dirname "$path")"
printf '%s\n' "$payload" > "$path""#,
        squote(content)
    );
    Script::new(body).arg(path)
}

/// Recursively chown a tree.
#[must_use]
pub fn chown_tree(path: &str, user: &str, group: &str) -> Script {
    Script::new("chown -R \"$2:$3\" \"$1\"").arg(path).arg(user).arg(group)
}

/// Chmod one directory.
#[must_use]
pub fn chmod_dir(path: &str, mode: &str) -> Script {
    Script::new("chmod \"$2\" \"$1\"").arg(path).arg(mode)
}

/// Restart each service in turn.
#[must_use]
pub fn restart_services(services: &[String]) -> Script {
    Script::new(
        r#"for svc in "$@"; do
    systemctl restart "$svc"
done"#,
    )
    .args(services.iter().cloned())
}

/// Reload (or restart, where reload is unsupported) each service.
#[must_use]
pub fn reload_services(services: &[String]) -> Script {
    Script::new(
        r#"for svc in "$@"; do
    systemctl reload "$svc" 2>/dev/null || systemctl restart "$svc"
done"#,
    )
    .args(services.iter().cloned())
}

/// Stop each service, ignoring already-stopped ones.
#[must_use]
pub fn stop_services(services: &[String]) -> Script {
    Script::new(
        r#"for svc in "$@"; do
    systemctl stop "$svc" 2>/dev/null || true
done"#,
    )
    .args(services.iter().cloned())
}

// ============================================================================
// Migration
// ============================================================================

/// Archive the tenant tree to an archive path outside it.
#[must_use]
pub fn backup_tree(base: &str, archive: &str) -> Script {
    Script::new(
        r#"base="$1"; archive="$2"
mkdir -p "$(dirname "$archive")"
tar -czf "$archive" -C "$base" ."#,
    )
    .arg(base)
    .arg(archive)
}

/// Move legacy subtrees into the web-centric layout.
///
/// Guarded on the new-layout markers so a partially-completed migration
/// re-runs without re-moving data. Prints `MOVED:<n>` for the caller.
#[must_use]
pub fn migrate_layout(base: &str) -> Script {
    Script::new(
        r#"base="$1"
moved=0
if [ ! -d "$base/web/app" ]; then
    mkdir -p "$base/web"
    if [ -d "$base/public_html" ]; then
        mkdir -p "$base/web/app"
        mv "$base/public_html" "$base/web/app/public"
        moved=$((moved + 1))
    else
        mkdir -p "$base/web/app/public"
    fi
fi
if [ ! -d "$base/web/log" ]; then
    if [ -d "$base/logs" ]; then
        mv "$base/logs" "$base/web/log"
        moved=$((moved + 1))
    else
        mkdir -p "$base/web/log"
    fi
fi
[ -d "$base/web/run" ] || mkdir -p "$base/web/run"
echo "MOVED:$moved""#,
    )
    .arg(base)
}

/// Count post-migration markers present, one `MARKER:<name>` line each.
#[must_use]
pub fn verify_markers(public: &str, log: &str, run: &str) -> Script {
    Script::new(
        r#"public="$1"; log="$2"; run="$3"
[ -d "$public" ] && echo "MARKER:public"
[ -d "$log" ] && echo "MARKER:log"
[ -d "$run" ] && echo "MARKER:run"
if [ -f "$public/index.php" ] || [ -f "$public/index.html" ]; then
    echo "MARKER:index"
fi
exit 0"#,
    )
    .arg(public)
    .arg(log)
    .arg(run)
}

/// Extract a backup archive over the tenant tree.
#[must_use]
pub fn restore_tree(base: &str, archive: &str) -> Script {
    Script::new(
        r#"base="$1"; archive="$2"
[ -f "$archive" ]
mkdir -p "$base"
tar -xzf "$archive" -C "$base""#,
    )
    .arg(base)
    .arg(archive)
}

/// Escape arbitrary content for embedding inside single quotes.
fn squote(content: &str) -> String {
    content.replace('\'', "'\\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probes_take_quoted_args() {
        let script = stat_owner("/home/u1001");
        assert_eq!(script.arg_list(), ["/home/u1001"]);
        assert!(script.rendered().contains("stat -c"));
    }

    #[test]
    fn test_create_user_is_guarded() {
        let script = create_user("u1001", 1001, 1001, "/home/u1001", "/bin/bash");
        let body = script.rendered();
        assert!(body.contains("if ! getent passwd"));
        assert!(body.contains("useradd"));
        assert_eq!(script.arg_list()[1], "1001");
    }

    #[test]
    fn test_write_file_skips_matching_content() {
        let script = write_file("/etc/nginx/sites-enabled/example.com.conf", "server {}");
        let body = script.rendered();
        assert!(body.contains("payload='server {}'"));
        assert!(body.contains("exit 0"));
    }

    #[test]
    fn test_write_file_escapes_single_quotes() {
        let script = write_file("/tmp/f", "it's here");
        assert!(script.rendered().contains("it'\\''s here"));
    }

    #[test]
    fn test_migrate_layout_reports_moves() {
        let script = migrate_layout("/home/u1001");
        let body = script.rendered();
        assert!(body.contains("MOVED:$moved"));
        assert!(body.contains("[ ! -d \"$base/web/app\" ]"));
    }

    #[test]
    fn test_verify_markers_always_succeeds() {
        let body = verify_markers("/p", "/l", "/r").rendered();
        assert!(body.trim_end().ends_with("exit 0"));
        assert!(body.contains("MARKER:index"));
    }

    #[test]
    fn test_list_uids_floor() {
        let script = list_uids(1000);
        assert_eq!(script.arg_list(), ["1000"]);
    }
}

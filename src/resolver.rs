//! Identity resolution.
//!
//! Maps a bare domain (plus optional node/group hints) to exactly one
//! fully-qualified tenant. Every component resolves through here before
//! touching a remote host; nothing may guess a node.

use crate::store::{Store, TenantKey};

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The store's tenant index answered.
    Store,
    /// The index had nothing; the on-disk registry scan answered.
    FilesystemFallback,
}

/// A successfully resolved tenant identity.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub key: TenantKey,
    pub provenance: Provenance,
}

/// A resolution request.
#[derive(Debug, Clone)]
pub struct TenantQuery {
    pub domain: String,
    pub node: Option<String>,
    pub group: Option<String>,
}

impl TenantQuery {
    /// Query by domain alone.
    #[must_use]
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            node: None,
            group: None,
        }
    }

    /// Add a node hint.
    #[must_use]
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Add a group hint.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No tenant matched, in the store or on disk.
    #[error("tenant not found: {domain}")]
    NotFound {
        /// The queried domain.
        domain: String,
    },

    /// More than one tenant matched; the caller must add a hint.
    #[error("ambiguous tenant {domain}: {} candidates ({})", candidates.len(), candidate_list(candidates))]
    Ambiguous {
        /// The queried domain.
        domain: String,
        /// Every matching identity.
        candidates: Vec<TenantKey>,
    },
}

fn candidate_list(candidates: &[TenantKey]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve a query against the store, falling back to the on-disk registry.
pub fn resolve(store: &Store, query: &TenantQuery) -> Result<Resolved, ResolveError> {
    let node = query.node.as_deref();
    let group = query.group.as_deref();

    // Fully-qualified queries validate directly.
    if let (Some(node), Some(group)) = (node, group) {
        let key = TenantKey {
            group: group.to_string(),
            node: node.to_string(),
            domain: query.domain.clone(),
        };
        let matches = store.query_index(&query.domain, Some(node), Some(group));
        if matches.contains(&key) {
            return Ok(Resolved {
                key,
                provenance: Provenance::Store,
            });
        }
        if store
            .scan_registry(&query.domain, Some(node), Some(group))
            .contains(&key)
        {
            return Ok(Resolved {
                key,
                provenance: Provenance::FilesystemFallback,
            });
        }
        return Err(ResolveError::NotFound {
            domain: query.domain.clone(),
        });
    }

    match decide(store.query_index(&query.domain, node, group), query)? {
        Some(key) => Ok(Resolved {
            key,
            provenance: Provenance::Store,
        }),
        None => {
            log::debug!(
                "store index empty for {}, scanning filesystem registry",
                query.domain
            );
            match decide(store.scan_registry(&query.domain, node, group), query)? {
                Some(key) => Ok(Resolved {
                    key,
                    provenance: Provenance::FilesystemFallback,
                }),
                None => Err(ResolveError::NotFound {
                    domain: query.domain.clone(),
                }),
            }
        }
    }
}

/// The single/zero/many rule shared by both sources.
fn decide(
    mut matches: Vec<TenantKey>,
    query: &TenantQuery,
) -> Result<Option<TenantKey>, ResolveError> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches.remove(0))),
        _ => {
            matches.sort();
            Err(ResolveError::Ambiguous {
                domain: query.domain.clone(),
                candidates: matches,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Tenant;

    fn store_with(tenants: &[(&str, &str)]) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        for (domain, node) in tenants {
            store
                .save_tenant(&mut Tenant::new(domain, "fleet", node))
                .unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_unique_domain_resolves() {
        let (_dir, store) = store_with(&[("example.com", "node-a")]);
        let resolved = resolve(&store, &TenantQuery::domain("example.com")).unwrap();
        assert_eq!(resolved.key.node, "node-a");
        assert_eq!(resolved.provenance, Provenance::Store);
    }

    #[test]
    fn test_duplicate_domain_is_ambiguous() {
        let (_dir, store) = store_with(&[("example.com", "node-a"), ("example.com", "node-b")]);
        let err = resolve(&store, &TenantQuery::domain("example.com")).unwrap_err();
        match err {
            ResolveError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                let nodes: Vec<&str> = candidates.iter().map(|k| k.node.as_str()).collect();
                assert!(nodes.contains(&"node-a"));
                assert!(nodes.contains(&"node-b"));
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_node_hint_disambiguates() {
        let (_dir, store) = store_with(&[("example.com", "node-a"), ("example.com", "node-b")]);
        let resolved =
            resolve(&store, &TenantQuery::domain("example.com").on_node("node-b")).unwrap();
        assert_eq!(resolved.key.node, "node-b");
    }

    #[test]
    fn test_unknown_domain_not_found() {
        let (_dir, store) = store_with(&[("example.com", "node-a")]);
        let err = resolve(&store, &TenantQuery::domain("missing.io")).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn test_filesystem_fallback_when_index_gone() {
        let (_dir, store) = store_with(&[("example.com", "node-a")]);
        std::fs::remove_file(store.root().join("tenants").join("index.toml")).unwrap();
        let resolved = resolve(&store, &TenantQuery::domain("example.com")).unwrap();
        assert_eq!(resolved.provenance, Provenance::FilesystemFallback);
        assert_eq!(resolved.key.node, "node-a");
    }

    #[test]
    fn test_fully_qualified_validates_directly() {
        let (_dir, store) = store_with(&[("example.com", "node-a")]);
        let query = TenantQuery::domain("example.com")
            .on_node("node-a")
            .in_group("fleet");
        let resolved = resolve(&store, &query).unwrap();
        assert_eq!(resolved.key.group, "fleet");

        let bad = TenantQuery::domain("example.com")
            .on_node("node-z")
            .in_group("fleet");
        assert!(matches!(
            resolve(&store, &bad).unwrap_err(),
            ResolveError::NotFound { .. }
        ));
    }
}

//! Cache group registry and key construction.
//!
//! A group is a named partition with a persistence classification and a
//! default TTL. Keys are namespaced as `(tenant:)?group:raw-key`; the tenant
//! prefix is omitted for global groups so explicitly shared data stays
//! shared across tenants.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;

use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "store::groups";

/// Persistence classification of a cache group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Written through to the persistent store, namespaced per tenant.
    Persistent,
    /// Lives only in the request-scoped in-memory tier.
    NonPersistent,
    /// Written through, shared across tenants (no tenant prefix).
    Global,
}

/// A named cache partition.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheGroup {
    pub name: String,
    pub kind: GroupKind,
    /// Default TTL in seconds; `None` falls back to the registry default.
    pub default_ttl_secs: Option<u64>,
}

impl CacheGroup {
    pub fn new(name: impl Into<String>, kind: GroupKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default_ttl_secs: None,
        }
    }

    pub fn with_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = Some(secs);
        self
    }
}

/// Registry of cache groups, bound at startup.
///
/// Unknown groups are treated as persistent with the fallback TTL, so a
/// caller inventing a group name degrades to the safest classification.
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, CacheGroup>>,
    tenant: Option<String>,
    fallback_ttl: Duration,
}

impl GroupRegistry {
    pub fn new(tenant: Option<String>, fallback_ttl: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            tenant,
            fallback_ttl,
        }
    }

    /// Register a group. Intended for startup wiring; later registrations
    /// replace the previous definition.
    pub fn register(&self, group: CacheGroup) {
        rw_write(&self.groups, SOURCE, "register").insert(group.name.clone(), group);
    }

    pub fn kind_of(&self, group: &str) -> GroupKind {
        rw_read(&self.groups, SOURCE, "kind_of")
            .get(group)
            .map(|g| g.kind)
            .unwrap_or(GroupKind::Persistent)
    }

    pub fn ttl_for(&self, group: &str) -> Duration {
        rw_read(&self.groups, SOURCE, "ttl_for")
            .get(group)
            .and_then(|g| g.default_ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(self.fallback_ttl)
    }

    /// Build the namespaced key for `(group, raw key)`.
    pub fn namespaced_key(&self, group: &str, key: &str) -> String {
        match (&self.tenant, self.kind_of(group)) {
            (Some(tenant), GroupKind::Persistent | GroupKind::NonPersistent) => {
                format!("{tenant}:{group}:{key}")
            }
            _ => format!("{group}:{key}"),
        }
    }

    pub fn group_count(&self) -> usize {
        rw_read(&self.groups, SOURCE, "group_count").len()
    }
}

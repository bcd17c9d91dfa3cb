//! Persistent store boundary.
//!
//! The front cache consumes this interface; the host environment supplies an
//! implementation backed by whatever key/value store it runs against.
//! `MemoryStore` ships in-crate for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::CacheError;
use crate::lock::{rw_read, rw_write};

use super::CacheValue;

const SOURCE: &str = "store::backend";

/// Key/value store keyed by `(group, key)`.
///
/// Implementations own entry storage and TTL bookkeeping. An expired entry
/// must be reported as absent; eviction policy is up to the implementation.
pub trait PersistentStore: Send + Sync {
    fn get(&self, group: &str, key: &str) -> Result<Option<CacheValue>, CacheError>;
    /// Store a value. A zero TTL means the entry does not expire.
    fn set(&self, group: &str, key: &str, value: CacheValue, ttl: Duration)
    -> Result<(), CacheError>;
    fn delete(&self, group: &str, key: &str) -> Result<(), CacheError>;
    /// Remove every key stored under the group, as a unit.
    fn flush_group(&self, group: &str) -> Result<(), CacheError>;
    fn flush_all(&self) -> Result<(), CacheError>;
}

struct StoredEntry {
    value: CacheValue,
    expires_at: Option<OffsetDateTime>,
}

impl StoredEntry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory persistent store with lazy TTL expiry on read.
pub struct MemoryStore {
    groups: RwLock<HashMap<String, HashMap<String, StoredEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) entries across all groups.
    pub fn len(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        rw_read(&self.groups, SOURCE, "len")
            .values()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, group: &str, key: &str) -> Result<Option<CacheValue>, CacheError> {
        let now = OffsetDateTime::now_utc();
        let mut groups = rw_write(&self.groups, SOURCE, "get");
        let Some(entries) = groups.get_mut(group) else {
            return Ok(None);
        };
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(
        &self,
        group: &str,
        key: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(OffsetDateTime::now_utc() + ttl)
        };
        rw_write(&self.groups, SOURCE, "set")
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    fn delete(&self, group: &str, key: &str) -> Result<(), CacheError> {
        if let Some(entries) = rw_write(&self.groups, SOURCE, "delete").get_mut(group) {
            entries.remove(key);
        }
        Ok(())
    }

    fn flush_group(&self, group: &str) -> Result<(), CacheError> {
        rw_write(&self.groups, SOURCE, "flush_group").remove(group);
        Ok(())
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        rw_write(&self.groups, SOURCE, "flush_all").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_get_delete_roundtrip() {
        let store = MemoryStore::new();

        assert!(store.get("prospects", "k").expect("get").is_none());

        store
            .set("prospects", "k", json!({"email": "a@b.c"}), Duration::ZERO)
            .expect("set");
        let value = store.get("prospects", "k").expect("get").expect("present");
        assert_eq!(value["email"], "a@b.c");

        store.delete("prospects", "k").expect("delete");
        assert!(store.get("prospects", "k").expect("get").is_none());
    }

    #[test]
    fn expired_entry_is_absent() {
        let store = MemoryStore::new();
        store
            .set("prospects", "k", json!(1), Duration::from_nanos(1))
            .expect("set");
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("prospects", "k").expect("get").is_none());
        // Lazy expiry removed the entry on read.
        assert!(store.is_empty());
    }

    #[test]
    fn flush_group_leaves_other_groups() {
        let store = MemoryStore::new();
        store
            .set("prospects", "a", json!(1), Duration::ZERO)
            .expect("set");
        store
            .set("quizzes", "b", json!(2), Duration::ZERO)
            .expect("set");

        store.flush_group("prospects").expect("flush");

        assert!(store.get("prospects", "a").expect("get").is_none());
        assert!(store.get("quizzes", "b").expect("get").is_some());
    }

    #[test]
    fn flush_all_clears_everything() {
        let store = MemoryStore::new();
        store
            .set("prospects", "a", json!(1), Duration::ZERO)
            .expect("set");
        store
            .set("quizzes", "b", json!(2), Duration::ZERO)
            .expect("set");

        store.flush_all().expect("flush_all");
        assert!(store.is_empty());
    }
}

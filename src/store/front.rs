//! Front cache: request-scoped in-memory tier over the persistent store.
//!
//! Reads consult the in-memory tier first and fall back to the persistent
//! store for persistent/global groups. Writes update both tiers and the tag
//! index synchronously. A store failure during a read degrades to a miss;
//! the caller recomputes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::lock::{rw_read, rw_write};

use super::groups::{GroupKind, GroupRegistry};
use super::tags::{TagIndex, TaggedKey};
use super::{CacheValue, PersistentStore};

const SOURCE: &str = "store::front";
const CLAIM_PREFIX: &str = "claim:";

const METRIC_FRONT_HIT: &str = "quizcache_front_hit_total";
const METRIC_FRONT_MISS: &str = "quizcache_front_miss_total";
const METRIC_TAG_CLEAR: &str = "quizcache_tag_clear_total";

struct TierEntry {
    group: String,
    value: CacheValue,
    expires_at: Option<OffsetDateTime>,
}

impl TierEntry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Two-tier tagged object cache.
///
/// The in-memory tier is request-local by contract: the host calls
/// [`FrontCache::clear_request_tier`] when a request finishes. The persistent
/// store is the only cross-request shared resource.
pub struct FrontCache {
    groups: Arc<GroupRegistry>,
    store: Arc<dyn PersistentStore>,
    tier: RwLock<HashMap<String, TierEntry>>,
    tags: TagIndex,
    claim_ttl: Duration,
    enabled: bool,
}

impl FrontCache {
    pub fn new(
        groups: Arc<GroupRegistry>,
        store: Arc<dyn PersistentStore>,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            groups,
            store,
            tier: RwLock::new(HashMap::new()),
            tags: TagIndex::new(),
            claim_ttl,
            enabled: true,
        }
    }

    /// Toggle the cache; wire `CacheConfig::enable_front_cache` through here.
    ///
    /// Disabled, reads always miss and writes are dropped, so every caller
    /// recomputes. Deletes, flushes, and tag clears still reach the
    /// persistent store: invalidation must work on data written while the
    /// cache was on.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Look up a value. A store failure is a miss, never an error.
    pub fn get(&self, key: &str, group: &str) -> Option<CacheValue> {
        if !self.enabled {
            return None;
        }
        let ns = self.groups.namespaced_key(group, key);
        let now = OffsetDateTime::now_utc();

        {
            let mut tier = rw_write(&self.tier, SOURCE, "get.tier");
            match tier.get(&ns) {
                Some(entry) if entry.is_expired(now) => {
                    tier.remove(&ns);
                }
                Some(entry) => {
                    counter!(METRIC_FRONT_HIT, "tier" => "memory").increment(1);
                    return Some(entry.value.clone());
                }
                None => {}
            }
        }

        if self.groups.kind_of(group) == GroupKind::NonPersistent {
            counter!(METRIC_FRONT_MISS).increment(1);
            return None;
        }

        match self.store.get(group, &ns) {
            Ok(Some(value)) => {
                counter!(METRIC_FRONT_HIT, "tier" => "store").increment(1);
                // Populate the in-memory tier; the store keeps authoritative
                // expiry, so the tier copy lives for the rest of the request.
                rw_write(&self.tier, SOURCE, "get.populate").insert(
                    ns,
                    TierEntry {
                        group: group.to_string(),
                        value: value.clone(),
                        expires_at: None,
                    },
                );
                Some(value)
            }
            Ok(None) => {
                counter!(METRIC_FRONT_MISS).increment(1);
                None
            }
            Err(err) => {
                warn!(group, key, error = %err, "store read failed; treating as miss");
                counter!(METRIC_FRONT_MISS, "reason" => "store_error").increment(1);
                None
            }
        }
    }

    /// Store a value in both tiers and register its tags.
    ///
    /// The group name is always a tag; `extra_tags` carries the entity tags
    /// the caller derives from its own identifiers.
    pub fn set(
        &self,
        key: &str,
        value: CacheValue,
        group: &str,
        ttl: Option<Duration>,
        extra_tags: &[String],
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let ns = self.groups.namespaced_key(group, key);
        let ttl = ttl.unwrap_or_else(|| self.groups.ttl_for(group));
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(OffsetDateTime::now_utc() + ttl)
        };

        rw_write(&self.tier, SOURCE, "set.tier").insert(
            ns.clone(),
            TierEntry {
                group: group.to_string(),
                value: value.clone(),
                expires_at,
            },
        );

        if self.groups.kind_of(group) != GroupKind::NonPersistent {
            self.store.set(group, &ns, value, ttl)?;
        }

        let mut tag_set: std::collections::HashSet<String> =
            extra_tags.iter().cloned().collect();
        tag_set.insert(group.to_string());
        self.tags.register(TaggedKey::new(group, key), tag_set);

        Ok(())
    }

    /// Remove a key from both tiers and the tag index.
    pub fn delete(&self, key: &str, group: &str) -> Result<(), CacheError> {
        let ns = self.groups.namespaced_key(group, key);
        rw_write(&self.tier, SOURCE, "delete.tier").remove(&ns);
        self.tags.unregister(&TaggedKey::new(group, key));

        if self.groups.kind_of(group) != GroupKind::NonPersistent {
            self.store.delete(group, &ns)?;
        }
        Ok(())
    }

    /// Remove every entry belonging to a group, in both tiers, and drop the
    /// group's tag-index entries.
    pub fn flush_group(&self, group: &str) -> Result<(), CacheError> {
        rw_write(&self.tier, SOURCE, "flush_group.tier").retain(|_, entry| entry.group != group);
        self.tags.drop_group(group);

        if self.groups.kind_of(group) != GroupKind::NonPersistent {
            self.store.flush_group(group)?;
        }
        debug!(group, "group flushed");
        Ok(())
    }

    /// Delete every key under a tag. Idempotent: an unknown tag yields 0.
    ///
    /// A store failure for one key does not stop the rest; partial
    /// invalidation is accepted over leaving stale data reachable.
    pub fn clear_by_tag(&self, tag: &str) -> usize {
        let keys = self.tags.take_tag(tag);
        let count = keys.len();
        for tagged in keys {
            if let Err(err) = self.delete(&tagged.key, &tagged.group) {
                warn!(tag, group = %tagged.group, key = %tagged.key, error = %err,
                    "tag clear: delete failed, continuing");
            }
        }
        if count > 0 {
            counter!(METRIC_TAG_CLEAR).increment(count as u64);
            debug!(tag, count, "cleared keys by tag");
        }
        count
    }

    /// Store a value only if the key is currently absent.
    pub fn add(
        &self,
        key: &str,
        value: CacheValue,
        group: &str,
        ttl: Option<Duration>,
        extra_tags: &[String],
    ) -> Result<bool, CacheError> {
        if !self.enabled {
            return Ok(false);
        }
        if self.get(key, group).is_some() {
            return Ok(false);
        }
        self.set(key, value, group, ttl, extra_tags)?;
        Ok(true)
    }

    /// Add to a numeric value. Read-modify-write over get+set: not atomic
    /// across the two tiers. Returns the new value, or `None` when the key
    /// is absent or non-numeric.
    pub fn increment(&self, key: &str, delta: i64, group: &str) -> Result<Option<i64>, CacheError> {
        let Some(current) = self.get(key, group).and_then(|v| v.as_i64()) else {
            return Ok(None);
        };
        let next = current.saturating_add(delta);
        let tags: Vec<String> = self
            .tags
            .tags_for(&TaggedKey::new(group, key))
            .into_iter()
            .filter(|t| t != group)
            .collect();
        self.set(key, json!(next), group, None, &tags)?;
        Ok(Some(next))
    }

    /// Subtract from a numeric value, never going below zero.
    pub fn decrement(&self, key: &str, delta: i64, group: &str) -> Result<Option<i64>, CacheError> {
        let Some(current) = self.get(key, group).and_then(|v| v.as_i64()) else {
            return Ok(None);
        };
        let next = current.saturating_sub(delta).max(0);
        let tags: Vec<String> = self
            .tags
            .tags_for(&TaggedKey::new(group, key))
            .into_iter()
            .filter(|t| t != group)
            .collect();
        self.set(key, json!(next), group, None, &tags)?;
        Ok(Some(next))
    }

    /// Drop the request-scoped in-memory tier. Called at end-of-request.
    pub fn clear_request_tier(&self) {
        rw_write(&self.tier, SOURCE, "clear_request_tier").clear();
    }

    /// Try to claim a key for recomputation.
    ///
    /// Best-effort stampede suppression: the claim lives in the persistent
    /// store under a short TTL and only advises against duplicate stores; it
    /// never gates reads, and a crashed claimant simply expires.
    pub fn try_claim(&self, key: &str, group: &str) -> bool {
        // Nothing will be stored anyway; don't litter the store with markers.
        if !self.enabled {
            return true;
        }
        let ns = self
            .groups
            .namespaced_key(group, &format!("{CLAIM_PREFIX}{key}"));
        match self.store.get(group, &ns) {
            Ok(Some(_)) => false,
            Ok(None) => self
                .store
                .set(group, &ns, json!(true), self.claim_ttl)
                .is_ok(),
            // Store unreachable: claims are advisory, let the caller proceed.
            Err(_) => true,
        }
    }

    pub fn release_claim(&self, key: &str, group: &str) {
        let ns = self
            .groups
            .namespaced_key(group, &format!("{CLAIM_PREFIX}{key}"));
        if let Err(err) = self.store.delete(group, &ns) {
            warn!(group, key, error = %err, "claim release failed; marker will expire");
        }
    }

    /// Drop everything: tier, tag index, and the persistent store.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.clear_request_tier();
        self.tags.clear();
        self.store.flush_all()
    }

    pub fn tier_len(&self) -> usize {
        rw_read(&self.tier, SOURCE, "tier_len").len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.tag_count()
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }
}

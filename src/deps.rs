//! Dependency tracker: per-entity invalidation history.
//!
//! Records who invalidated what and when, for audit and debugging. Purely
//! observational; never consulted for invalidation decisions and never
//! blocks one.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use time::OffsetDateTime;

use crate::lock::mutex_lock;

const SOURCE: &str = "deps";

/// One invalidation occurrence.
#[derive(Debug, Clone)]
pub struct DependencyRecord {
    pub at: OffsetDateTime,
    pub action: String,
    pub actor: String,
}

/// Capped invalidation history per `(entity type, entity id)`.
///
/// Each entity keeps its last `history_limit` records; the number of tracked
/// entities is itself bounded, evicting the least recently touched history.
pub struct DependencyTracker {
    histories: Mutex<LruCache<(String, String), VecDeque<DependencyRecord>>>,
    history_limit: usize,
}

impl DependencyTracker {
    pub fn new(entity_limit: NonZeroUsize, history_limit: NonZeroUsize) -> Self {
        Self {
            histories: Mutex::new(LruCache::new(entity_limit)),
            history_limit: history_limit.get(),
        }
    }

    pub fn record(&self, entity_type: &str, entity_id: &str, actor: &str, action: &str) {
        let mut histories = mutex_lock(&self.histories, SOURCE, "record");
        let history = histories
            .get_or_insert_mut((entity_type.to_string(), entity_id.to_string()), || {
                VecDeque::new()
            });
        if history.len() == self.history_limit {
            history.pop_front();
        }
        history.push_back(DependencyRecord {
            at: OffsetDateTime::now_utc(),
            action: action.to_string(),
            actor: actor.to_string(),
        });
    }

    /// History in chronological order; empty for untracked entities.
    pub fn history(&self, entity_type: &str, entity_id: &str) -> Vec<DependencyRecord> {
        mutex_lock(&self.histories, SOURCE, "history")
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        mutex_lock(&self.histories, SOURCE, "entity_count").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DependencyTracker {
        DependencyTracker::new(
            NonZeroUsize::new(16).expect("nonzero"),
            NonZeroUsize::new(10).expect("nonzero"),
        )
    }

    #[test]
    fn record_and_read_back() {
        let deps = tracker();
        deps.record("lead", "42", "rules", "delete prospects:prospect_42");

        let history = deps.history("lead", "42");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor, "rules");
    }

    #[test]
    fn history_is_capped_at_limit() {
        let deps = tracker();
        for i in 0..25 {
            deps.record("lead", "42", "rules", &format!("action-{i}"));
        }

        let history = deps.history("lead", "42");
        assert_eq!(history.len(), 10);
        // Oldest entries dropped; latest kept in order.
        assert_eq!(history[0].action, "action-15");
        assert_eq!(history[9].action, "action-24");
    }

    #[test]
    fn unknown_entity_has_empty_history() {
        let deps = tracker();
        assert!(deps.history("lead", "404").is_empty());
    }

    #[test]
    fn entity_bound_evicts_least_recent() {
        let deps = DependencyTracker::new(
            NonZeroUsize::new(2).expect("nonzero"),
            NonZeroUsize::new(10).expect("nonzero"),
        );
        deps.record("lead", "1", "rules", "a");
        deps.record("lead", "2", "rules", "b");
        deps.record("lead", "3", "rules", "c");

        assert_eq!(deps.entity_count(), 2);
        assert!(deps.history("lead", "1").is_empty());
        assert!(!deps.history("lead", "3").is_empty());
    }
}

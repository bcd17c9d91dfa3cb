//! Tag index for bulk invalidation.
//!
//! Maintains tag → key and key → tag mappings so that deleting a key removes
//! it from every tag synchronously, keeping the index free of dangling
//! references.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "store::tags";

/// A cache key as the tag index sees it: raw key plus its group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaggedKey {
    pub group: String,
    pub key: String,
}

impl TaggedKey {
    pub fn new(group: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            key: key.into(),
        }
    }
}

/// Bidirectional tag ↔ key index.
pub struct TagIndex {
    tag_to_keys: RwLock<HashMap<String, BTreeSet<TaggedKey>>>,
    key_to_tags: RwLock<HashMap<TaggedKey, HashSet<String>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self {
            tag_to_keys: RwLock::new(HashMap::new()),
            key_to_tags: RwLock::new(HashMap::new()),
        }
    }

    /// Register a key under a set of tags, replacing any previous tag set
    /// for that key (writes are full replacements).
    pub fn register(&self, key: TaggedKey, tags: HashSet<String>) {
        self.unregister(&key);

        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "register.tags");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "register.keys");
        for tag in &tags {
            t2k.entry(tag.clone()).or_default().insert(key.clone());
        }
        k2t.insert(key, tags);
    }

    /// Remove a key from every tag it was registered under.
    pub fn unregister(&self, key: &TaggedKey) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "unregister.tags");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "unregister.keys");

        if let Some(tags) = k2t.remove(key) {
            for tag in tags {
                if let Some(keys) = t2k.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        t2k.remove(&tag);
                    }
                }
            }
        }
    }

    /// Remove a tag, returning every key it referenced.
    ///
    /// Idempotent: an unknown tag yields an empty set.
    pub fn take_tag(&self, tag: &str) -> BTreeSet<TaggedKey> {
        let keys = rw_write(&self.tag_to_keys, SOURCE, "take_tag")
            .remove(tag)
            .unwrap_or_default();

        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "take_tag.keys");
        for key in &keys {
            if let Some(tags) = k2t.get_mut(key) {
                tags.remove(tag);
            }
        }
        keys
    }

    /// Keys currently registered under a tag.
    pub fn keys_for(&self, tag: &str) -> BTreeSet<TaggedKey> {
        rw_read(&self.tag_to_keys, SOURCE, "keys_for")
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Tags currently registered for a key.
    pub fn tags_for(&self, key: &TaggedKey) -> HashSet<String> {
        rw_read(&self.key_to_tags, SOURCE, "tags_for")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every index entry referencing the given group.
    pub fn drop_group(&self, group: &str) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "drop_group.tags");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "drop_group.keys");

        k2t.retain(|key, _| key.group != group);
        t2k.retain(|_, keys| {
            keys.retain(|key| key.group != group);
            !keys.is_empty()
        });
    }

    pub fn clear(&self) {
        rw_write(&self.tag_to_keys, SOURCE, "clear.tags").clear();
        rw_write(&self.key_to_tags, SOURCE, "clear.keys").clear();
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_keys, SOURCE, "tag_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_tags, SOURCE, "key_count").len()
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_and_lookup() {
        let index = TagIndex::new();
        let key = TaggedKey::new("prospects", "prospect_42");

        index.register(key.clone(), tags(&["prospects", "lead_42"]));

        assert!(index.keys_for("prospects").contains(&key));
        assert!(index.keys_for("lead_42").contains(&key));
    }

    #[test]
    fn unregister_removes_key_from_every_tag() {
        let index = TagIndex::new();
        let key = TaggedKey::new("prospects", "prospect_42");

        index.register(key.clone(), tags(&["prospects", "lead_42"]));
        index.unregister(&key);

        assert!(index.keys_for("prospects").is_empty());
        assert!(index.keys_for("lead_42").is_empty());
        assert_eq!(index.tag_count(), 0);
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn re_register_replaces_tag_set() {
        let index = TagIndex::new();
        let key = TaggedKey::new("prospects", "prospect_42");

        index.register(key.clone(), tags(&["old"]));
        index.register(key.clone(), tags(&["new"]));

        assert!(index.keys_for("old").is_empty());
        assert!(index.keys_for("new").contains(&key));
    }

    #[test]
    fn take_tag_is_idempotent() {
        let index = TagIndex::new();
        assert!(index.take_tag("missing").is_empty());

        let key = TaggedKey::new("prospects", "prospect_42");
        index.register(key.clone(), tags(&["lead_42"]));

        let taken = index.take_tag("lead_42");
        assert_eq!(taken.len(), 1);
        assert!(index.take_tag("lead_42").is_empty());
    }

    #[test]
    fn drop_group_only_touches_that_group() {
        let index = TagIndex::new();
        index.register(TaggedKey::new("prospects", "a"), tags(&["shared"]));
        index.register(TaggedKey::new("quizzes", "b"), tags(&["shared"]));

        index.drop_group("prospects");

        let remaining = index.keys_for("shared");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first().expect("one key").group, "quizzes");
    }
}

//! Page-cache entries and storage.
//!
//! Entries round-trip through the front cache under the `pages` group, so
//! group classification, tagging, and flushes apply to pages like any other
//! object. Each entry is tagged with its path so a purge removes every
//! variation at once.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::store::{CacheGroup, FrontCache, GroupKind};

use super::dynamic::{self, DynamicDescriptor, TokenMinter};
use super::variation::VariationDescriptor;

/// Group holding cached pages.
pub const PAGE_GROUP: &str = "pages";
const QUIZ_TAG: &str = "quiz-pages";

/// A captured rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    pub content: String,
    /// Response headers selected for replay.
    pub headers: Vec<(String, String)>,
    /// Unix timestamp of capture.
    pub created_at: i64,
    pub ttl_secs: u64,
    pub variation: VariationDescriptor,
    pub dynamic: DynamicDescriptor,
}

impl PageEntry {
    pub fn age_secs(&self, now: OffsetDateTime) -> i64 {
        (now.unix_timestamp() - self.created_at).max(0)
    }

    pub fn expires_at(&self) -> i64 {
        self.created_at + self.ttl_secs as i64
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= self.expires_at()
    }
}

/// Full-page cache over the front cache.
pub struct PageCache {
    front: Arc<FrontCache>,
    page_ttl_secs: u64,
    quiz_ttl_secs: u64,
    min_bytes: usize,
    max_bytes: usize,
    quiz_prefixes: Vec<String>,
}

impl PageCache {
    pub fn new(front: Arc<FrontCache>, config: &CacheConfig) -> Self {
        front.groups().register(
            CacheGroup::new(PAGE_GROUP, GroupKind::Persistent).with_ttl_secs(config.page_ttl_secs),
        );
        Self {
            front,
            page_ttl_secs: config.page_ttl_secs,
            quiz_ttl_secs: config.quiz_page_ttl_secs,
            min_bytes: config.min_page_bytes,
            max_bytes: config.max_page_bytes,
            quiz_prefixes: config.quiz_path_prefixes.clone(),
        }
    }

    /// `hash(host+path)`, extended with the variation hash when the
    /// descriptor is non-empty.
    pub fn cache_key(&self, host: &str, path: &str, variation: &VariationDescriptor) -> String {
        let base = hex_sha256(format!("{host}{path}").as_bytes());
        if variation.is_empty() {
            return base;
        }
        let serialized = serde_json::to_string(variation).unwrap_or_default();
        format!("{base}-{}", hex_sha256(serialized.as_bytes()))
    }

    /// Validated lookup: expiry and variation mismatch are silent misses.
    pub fn lookup(
        &self,
        host: &str,
        path: &str,
        variation: &VariationDescriptor,
    ) -> Option<PageEntry> {
        let key = self.cache_key(host, path, variation);
        let value = self.front.get(&key, PAGE_GROUP)?;
        let entry: PageEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path, error = %err, "cached page failed to decode; dropping");
                let _ = self.front.delete(&key, PAGE_GROUP);
                return None;
            }
        };

        if entry.is_expired(OffsetDateTime::now_utc()) {
            let _ = self.front.delete(&key, PAGE_GROUP);
            return None;
        }
        if entry.variation != *variation {
            debug!(path, "variation mismatch; treating as miss");
            return None;
        }
        Some(entry)
    }

    /// Capture and store a rendered page.
    ///
    /// Returns `Ok(false)` when the output is rejected (too small or too
    /// large to cache). The body is scanned for dynamic markers; their
    /// values stay in place and only their identities are recorded.
    pub fn store(
        &self,
        host: &str,
        path: &str,
        variation: &VariationDescriptor,
        content: String,
        headers: Vec<(String, String)>,
    ) -> Result<bool, CacheError> {
        if content.len() < self.min_bytes || content.len() > self.max_bytes {
            debug!(path, size = content.len(), "render rejected from page cache");
            return Ok(false);
        }

        let ttl_secs = if self.is_quiz_path(path) {
            self.quiz_ttl_secs
        } else {
            self.page_ttl_secs
        };

        let entry = PageEntry {
            dynamic: dynamic::scan(&content),
            content,
            headers,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            ttl_secs,
            variation: variation.clone(),
        };

        let mut tags = vec![format!("page:{path}")];
        if self.is_quiz_path(path) {
            tags.push(QUIZ_TAG.to_string());
        }

        let key = self.cache_key(host, path, variation);
        self.front.set(
            &key,
            serde_json::to_value(&entry)?,
            PAGE_GROUP,
            Some(Duration::from_secs(ttl_secs)),
            &tags,
        )?;
        debug!(path, ttl_secs, markers = entry.dynamic.markers.len(), "page cached");
        Ok(true)
    }

    /// Re-hydrate an entry's body for the serving viewer's session.
    pub fn serve(&self, entry: &PageEntry, minter: &dyn TokenMinter) -> String {
        dynamic::rehydrate(&entry.content, &entry.dynamic, minter)
    }

    /// Remove every variation cached for a path.
    pub fn purge_path(&self, path: &str) -> usize {
        self.front.clear_by_tag(&format!("page:{path}"))
    }

    /// Remove every page in the quiz flow.
    pub fn purge_quiz(&self) -> usize {
        self.front.clear_by_tag(QUIZ_TAG)
    }

    /// Flush the whole page-cache group.
    pub fn purge_all(&self) -> Result<(), CacheError> {
        self.front.flush_group(PAGE_GROUP)
    }

    pub fn is_quiz_path(&self, path: &str) -> bool {
        self.quiz_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub(crate) fn try_claim(&self, key: &str) -> bool {
        self.front.try_claim(key, PAGE_GROUP)
    }

    pub(crate) fn release_claim(&self, key: &str) {
        self.front.release_claim(key, PAGE_GROUP);
    }
}

fn hex_sha256(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use crate::store::{GroupRegistry, MemoryStore};

    use super::super::variation::DeviceClass;
    use super::*;

    fn page_cache() -> PageCache {
        let groups = Arc::new(GroupRegistry::new(None, Duration::from_secs(3600)));
        let front = Arc::new(FrontCache::new(
            groups,
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
        ));
        PageCache::new(front, &CacheConfig::default())
    }

    fn big_body(seed: &str) -> String {
        // Pad well past min_page_bytes so short seeds still produce a
        // cacheable body.
        format!("<html><body>{}</body></html>", seed.repeat(300))
    }

    #[test]
    fn store_and_lookup_roundtrip() {
        let cache = page_cache();
        let variation = VariationDescriptor::default();

        let stored = cache
            .store(
                "example.com",
                "/about",
                &variation,
                big_body("hello "),
                vec![("content-type".to_string(), "text/html".to_string())],
            )
            .expect("store");
        assert!(stored);

        let entry = cache
            .lookup("example.com", "/about", &variation)
            .expect("hit");
        assert!(entry.content.contains("hello"));
        assert_eq!(entry.headers[0].0, "content-type");
    }

    #[test]
    fn variation_mismatch_is_a_miss() {
        let cache = page_cache();
        let mobile = VariationDescriptor {
            device: DeviceClass::Mobile,
            ..Default::default()
        };

        cache
            .store("example.com", "/about", &mobile, big_body("m "), Vec::new())
            .expect("store");

        assert!(cache
            .lookup("example.com", "/about", &VariationDescriptor::default())
            .is_none());
        assert!(cache.lookup("example.com", "/about", &mobile).is_some());
    }

    #[test]
    fn tiny_render_is_rejected() {
        let cache = page_cache();
        let stored = cache
            .store(
                "example.com",
                "/about",
                &VariationDescriptor::default(),
                "<html></html>".to_string(),
                Vec::new(),
            )
            .expect("store");
        assert!(!stored);
    }

    #[test]
    fn quiz_paths_get_the_lower_ttl() {
        let cache = page_cache();
        let variation = VariationDescriptor::default();

        cache
            .store("example.com", "/quiz/7", &variation, big_body("q "), Vec::new())
            .expect("store");
        cache
            .store("example.com", "/about", &variation, big_body("a "), Vec::new())
            .expect("store");

        let quiz = cache.lookup("example.com", "/quiz/7", &variation).expect("hit");
        let page = cache.lookup("example.com", "/about", &variation).expect("hit");
        assert!(quiz.ttl_secs < page.ttl_secs);
    }

    #[test]
    fn purge_path_removes_all_variations() {
        let cache = page_cache();
        let desktop = VariationDescriptor::default();
        let mobile = VariationDescriptor {
            device: DeviceClass::Mobile,
            ..Default::default()
        };

        cache
            .store("example.com", "/about", &desktop, big_body("d "), Vec::new())
            .expect("store");
        cache
            .store("example.com", "/about", &mobile, big_body("m "), Vec::new())
            .expect("store");

        assert_eq!(cache.purge_path("/about"), 2);
        assert!(cache.lookup("example.com", "/about", &desktop).is_none());
        assert!(cache.lookup("example.com", "/about", &mobile).is_none());
    }

    #[test]
    fn purge_quiz_only_touches_quiz_pages() {
        let cache = page_cache();
        let variation = VariationDescriptor::default();

        cache
            .store("example.com", "/quiz/7", &variation, big_body("q "), Vec::new())
            .expect("store");
        cache
            .store("example.com", "/about", &variation, big_body("a "), Vec::new())
            .expect("store");

        assert_eq!(cache.purge_quiz(), 1);
        assert!(cache.lookup("example.com", "/quiz/7", &variation).is_none());
        assert!(cache.lookup("example.com", "/about", &variation).is_some());
    }

    #[test]
    fn same_path_different_host_gets_distinct_keys() {
        let cache = page_cache();
        let variation = VariationDescriptor::default();
        assert_ne!(
            cache.cache_key("a.example.com", "/", &variation),
            cache.cache_key("b.example.com", "/", &variation)
        );
    }

    #[test]
    fn capture_records_markers() {
        let cache = page_cache();
        let variation = VariationDescriptor::default();
        let body = format!(
            r#"{}<input type="hidden" name="nonce" value="deadbeef42">"#,
            big_body("x ")
        );

        cache
            .store("example.com", "/quiz/7", &variation, body, Vec::new())
            .expect("store");

        let entry = cache.lookup("example.com", "/quiz/7", &variation).expect("hit");
        assert_eq!(entry.dynamic.markers.len(), 1);
        assert!(entry.content.contains("deadbeef42"));
    }
}

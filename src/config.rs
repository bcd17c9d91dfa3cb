//! Cache configuration.
//!
//! Controls the front cache, rule engine, and page cache via `quizcache.toml`
//! with environment-variable overrides (`QUIZCACHE_*`).

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::CacheError;

// Default values for cache configuration
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_PAGE_TTL_SECS: u64 = 43_200;
const DEFAULT_QUIZ_PAGE_TTL_SECS: u64 = 1800;
const DEFAULT_MIN_PAGE_BYTES: usize = 255;
const DEFAULT_MAX_PAGE_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_CLAIM_TTL_SECS: u64 = 30;
const DEFAULT_DEPENDENCY_HISTORY_LIMIT: usize = 10;
const DEFAULT_DEPENDENCY_ENTITY_LIMIT: usize = 1024;
const DEFAULT_WARM_INTERVAL_SECS: u64 = 3600;
const ENV_PREFIX: &str = "QUIZCACHE";

/// Cache configuration from `quizcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the front (object) cache.
    pub enable_front_cache: bool,
    /// Enable the full-page cache.
    pub enable_page_cache: bool,
    /// Tenant identifier used to namespace keys in multi-tenant deployments.
    /// `None` means single-tenant; keys carry no tenant prefix.
    pub tenant_id: Option<String>,
    /// Default TTL (seconds) for groups without an explicit TTL.
    pub default_ttl_secs: u64,
    /// TTL (seconds) for cached pages outside the quiz flow.
    pub page_ttl_secs: u64,
    /// TTL cap (seconds) for pages that belong to the quiz flow.
    pub quiz_page_ttl_secs: u64,
    /// Rendered output below this size is never cached.
    pub min_page_bytes: usize,
    /// Rendered output above this size is never cached.
    pub max_page_bytes: usize,
    /// Cache pages that carry a query string.
    pub cache_query_strings: bool,
    /// Cache pages for authenticated/personalized sessions.
    pub cache_logged_in: bool,
    /// Path prefixes that are never page-cached (admin surfaces etc.).
    pub excluded_paths: Vec<String>,
    /// Cookie names whose presence marks a personalized session.
    pub session_cookies: Vec<String>,
    /// User-agent substrings that bypass the page cache.
    pub excluded_user_agents: Vec<String>,
    /// Path prefixes recognized as the quiz flow (lower TTL cap, quiz tag).
    pub quiz_path_prefixes: Vec<String>,
    /// Listing/archive paths purged when any content item changes.
    pub listing_paths: Vec<String>,
    /// TTL (seconds) of the stampede claim marker on the page-cache miss path.
    pub claim_ttl_secs: u64,
    /// Entries kept per entity in the dependency tracker.
    pub dependency_history_limit: usize,
    /// Number of entities tracked before the oldest history is evicted.
    pub dependency_entity_limit: usize,
    /// Interval (seconds) of the recurring bulk-warm job.
    pub warm_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_front_cache: true,
            enable_page_cache: true,
            tenant_id: None,
            default_ttl_secs: DEFAULT_TTL_SECS,
            page_ttl_secs: DEFAULT_PAGE_TTL_SECS,
            quiz_page_ttl_secs: DEFAULT_QUIZ_PAGE_TTL_SECS,
            min_page_bytes: DEFAULT_MIN_PAGE_BYTES,
            max_page_bytes: DEFAULT_MAX_PAGE_BYTES,
            cache_query_strings: false,
            cache_logged_in: false,
            excluded_paths: vec!["/admin".to_string(), "/api".to_string()],
            session_cookies: vec!["session".to_string(), "logged_in".to_string()],
            excluded_user_agents: Vec::new(),
            quiz_path_prefixes: vec!["/quiz".to_string()],
            listing_paths: vec!["/".to_string(), "/archive".to_string()],
            claim_ttl_secs: DEFAULT_CLAIM_TTL_SECS,
            dependency_history_limit: DEFAULT_DEPENDENCY_HISTORY_LIMIT,
            dependency_entity_limit: DEFAULT_DEPENDENCY_ENTITY_LIMIT,
            warm_interval_secs: DEFAULT_WARM_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    /// Load configuration with layered precedence: file (optional) → env.
    pub fn load(file: Option<&Path>) -> Result<Self, CacheError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|err| CacheError::configuration(err.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|err| CacheError::configuration(err.to_string()))
    }

    /// Returns true if any cache layer is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enable_front_cache || self.enable_page_cache
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn warm_interval(&self) -> Duration {
        Duration::from_secs(self.warm_interval_secs)
    }

    /// Returns the dependency history limit as NonZeroUsize, clamping to 1 if zero.
    pub fn dependency_history_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.dependency_history_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the dependency entity limit as NonZeroUsize, clamping to 1 if zero.
    pub fn dependency_entity_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.dependency_entity_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

//! Quizcache — the caching subsystem for a quiz/lead-capture web application.
//!
//! Provides three cooperating layers:
//!
//! - **Front cache** ([`FrontCache`]): a request-scoped in-memory tier over a
//!   pluggable persistent store, partitioned into classified groups and
//!   indexed by tags for bulk invalidation.
//! - **Invalidation rule engine** ([`RuleEngine`]): named rules bound to typed
//!   domain events, queued per request and flushed at end-of-request, with
//!   synchronous cascades and async warm hand-off.
//! - **Page cache** ([`PageCache`] + [`page_cache_layer`]): full rendered
//!   pages keyed by variation, with per-viewer dynamic tokens re-minted on
//!   every hit so a shared entry never leaks session state.
//!
//! Components are constructed explicitly and wired by the host application;
//! there are no process-wide registries.
//!
//! ## Configuration
//!
//! Behavior is controlled via `quizcache.toml` (or programmatically through
//! [`CacheConfig`]):
//!
//! ```toml
//! enable_front_cache = true
//! enable_page_cache = true
//! page_ttl_secs = 43200
//! quiz_page_ttl_secs = 1800
//! # ... see config.rs for all options
//! ```

pub mod admin;
pub mod config;
pub mod deps;
pub mod error;
pub mod events;
mod lock;
pub mod page;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod warm;

pub use admin::{CacheAdmin, CacheStatus};
pub use config::CacheConfig;
pub use deps::{DependencyRecord, DependencyTracker};
pub use error::CacheError;
pub use events::{DomainEvent, EventBus, Trigger};
pub use page::{
    DeviceClass, DynamicDescriptor, DynamicMarker, EligibilityPolicy, MarkerKind, PAGE_GROUP,
    PageCache, PageCacheState, PageEntry, SessionProvider, SkipReason, TokenMinter, VariationAxis,
    VariationDescriptor, page_cache_layer,
};
pub use rules::{
    CascadeTarget, DefaultPageRouter, EventContext, ExecutionMode, InvalidateAction,
    InvalidationRule, PageRouter, PageScope, RuleEngine, WarmAction,
};
pub use store::{
    CacheGroup, CacheValue, FrontCache, GroupKind, GroupRegistry, MemoryStore, PersistentStore,
    TagIndex, TaggedKey,
};
pub use telemetry::{LogFormat, TelemetrySettings};
pub use warm::{Warmer, start_recurring_warm};

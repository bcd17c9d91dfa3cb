//! Full-page cache.
//!
//! Captures rendered pages after the handler runs, keys them by host, path,
//! and variation, and re-hydrates per-viewer dynamic content on every hit so
//! one shared entry never leaks another visitor's tokens.

mod cache;
mod dynamic;
mod eligibility;
mod middleware;
mod variation;

pub use cache::{PAGE_GROUP, PageCache, PageEntry};
pub use dynamic::{DynamicDescriptor, DynamicMarker, MarkerKind, TokenMinter};
pub use eligibility::{EligibilityPolicy, SkipReason};
pub use middleware::{PageCacheState, SessionProvider, page_cache_layer};
pub use variation::{DeviceClass, VariationAxis, VariationDescriptor};

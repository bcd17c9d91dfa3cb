//! Tagged, multi-tier object cache.
//!
//! - `groups`: named partitions with persistence classification and TTLs
//! - `backend`: the persistent store boundary plus an in-memory implementation
//! - `tags`: tag → key index for bulk invalidation
//! - `front`: the request-facing cache layered over the persistent store

mod backend;
mod front;
mod groups;
mod tags;

pub use backend::{MemoryStore, PersistentStore};
pub use front::FrontCache;
pub use groups::{CacheGroup, GroupKind, GroupRegistry};
pub use tags::{TagIndex, TaggedKey};

/// Cached payloads are JSON values; typed callers round-trip through serde.
pub type CacheValue = serde_json::Value;

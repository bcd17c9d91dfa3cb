//! Thin operator surface: a status snapshot and a manual clear.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::deps::DependencyTracker;
use crate::error::CacheError;
use crate::rules::RuleEngine;
use crate::store::FrontCache;

/// Point-in-time cache status for operators.
#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub front_tier_entries: usize,
    pub tag_count: usize,
    pub pending_invalidations: usize,
    pub pending_warms: usize,
    pub tracked_entities: usize,
}

pub struct CacheAdmin {
    front: Arc<FrontCache>,
    engine: Arc<RuleEngine>,
    deps: Arc<DependencyTracker>,
}

impl CacheAdmin {
    pub fn new(
        front: Arc<FrontCache>,
        engine: Arc<RuleEngine>,
        deps: Arc<DependencyTracker>,
    ) -> Self {
        Self {
            front,
            engine,
            deps,
        }
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            front_tier_entries: self.front.tier_len(),
            tag_count: self.front.tag_count(),
            pending_invalidations: self.engine.pending_invalidations(),
            pending_warms: self.engine.pending_warms(),
            tracked_entities: self.deps.entity_count(),
        }
    }

    /// Manual "clear cache": both tiers, the tag index, the persistent store.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        info!("manual cache clear requested");
        self.front.clear_all()
    }
}

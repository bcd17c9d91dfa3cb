//! Cache warming seam.
//!
//! The host implements [`Warmer`]: it owns the repositories and rendering
//! needed to recompute values, while the engine decides what to warm and
//! when. Warm actions always execute asynchronously.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::rules::{EventContext, WarmAction};
use crate::scheduler;

#[async_trait]
pub trait Warmer: Send + Sync {
    /// Recompute and store the value(s) a warm action names.
    async fn warm(&self, action: &WarmAction, ctx: &EventContext);

    /// Bulk re-population, run at startup and on the recurring schedule.
    async fn warm_all(&self);
}

/// Start the recurring bulk-warm job.
pub fn start_recurring_warm(warmer: Arc<dyn Warmer>, every: Duration) -> JoinHandle<()> {
    scheduler::start_recurring("bulk-warm", every, move || {
        let warmer = Arc::clone(&warmer);
        async move {
            warmer.warm_all().await;
        }
    })
}

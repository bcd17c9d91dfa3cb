//! Rule-driven invalidation engine.
//!
//! Rules are registered once at startup and are immutable thereafter. Each
//! rule binds a set of typed triggers to a closed set of invalidate actions,
//! an optional warm action, and optional cascade targets. Per queued item the
//! lifecycle is registered → triggered → queued → executed: dispatch moves a
//! matched rule's actions onto the request queues, and the end-of-request
//! flush executes them (handing async-flagged items and all warm actions to
//! the background scheduler). Cascades run synchronously inside dispatch.

mod actions;
mod engine;

pub use actions::{
    CascadeTarget, EventContext, ExecutionMode, InvalidateAction, InvalidationRule, PageScope,
    WarmAction,
};
pub use engine::{DefaultPageRouter, PageRouter, RuleEngine};

//! Rule and action definitions.
//!
//! Actions are a closed enum rather than stored callables, so the set of
//! possible effects is known and testable.

use std::collections::HashSet;

use crate::events::{DomainEvent, Trigger};

/// Invalidation effect bound to an event's arguments at queue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateAction {
    /// Delete `key_prefix + entity_id` from the group.
    DeleteKey { group: String, key_prefix: String },
    /// Flush an entire group.
    FlushGroup { group: String },
    /// Clear every key under `tag_prefix + entity_id`.
    ClearTag { tag_prefix: String },
    /// Purge cached pages for a scope (all variations).
    PurgePages { scope: PageScope },
}

/// Which cached pages a purge touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScope {
    /// The changed item's own page plus the home and listing pages that
    /// include it.
    Entity,
    Home,
    Listings,
    QuizFlow,
    All,
}

/// Proactive re-population effect; always executed asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmAction {
    /// Recompute and store `key_prefix + entity_id` in the group.
    Entity { group: String, key_prefix: String },
    /// Recompute the group's standing entries.
    Group { group: String },
    /// Re-render and store pages for a scope.
    Pages { scope: PageScope },
}

/// Follow-on flush triggered synchronously by a primary invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeTarget {
    /// Flush a named group.
    Group(String),
    /// Purge every quiz-tagged page.
    QuizPages,
    /// Purge the whole page cache.
    AllPages,
    /// Unrecognized target: forwarded on the event bus for other listeners.
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Executed inline during the end-of-request flush.
    Sync,
    /// Handed to the background scheduler at flush time.
    Async,
}

/// A named invalidation rule, bound at startup.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    pub name: String,
    pub triggers: HashSet<Trigger>,
    pub invalidate: Vec<InvalidateAction>,
    pub warm: Option<WarmAction>,
    pub cascade: Vec<CascadeTarget>,
    /// Higher priority rules queue their actions first.
    pub priority: u8,
    pub mode: ExecutionMode,
}

impl InvalidationRule {
    pub fn new(name: impl Into<String>, triggers: impl IntoIterator<Item = Trigger>) -> Self {
        Self {
            name: name.into(),
            triggers: triggers.into_iter().collect(),
            invalidate: Vec::new(),
            warm: None,
            cascade: Vec::new(),
            priority: 10,
            mode: ExecutionMode::Sync,
        }
    }

    pub fn invalidate(mut self, action: InvalidateAction) -> Self {
        self.invalidate.push(action);
        self
    }

    pub fn warm(mut self, action: WarmAction) -> Self {
        self.warm = Some(action);
        self
    }

    pub fn cascade(mut self, target: CascadeTarget) -> Self {
        self.cascade.push(target);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn matches(&self, event: &DomainEvent) -> bool {
        self.triggers.contains(&event.trigger())
    }
}

/// The event arguments an action was bound with.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub actor: String,
}

impl EventContext {
    pub fn from_event(event: &DomainEvent) -> Self {
        Self {
            entity_type: event.entity_type(),
            entity_id: event.entity_id(),
            actor: "rules".to_string(),
        }
    }

    /// Bind a key or tag prefix with the event's entity id.
    pub fn bind(&self, prefix: &str) -> String {
        match &self.entity_id {
            Some(id) => format!("{prefix}{id}"),
            None => prefix.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_matches_only_its_triggers() {
        let rule = InvalidationRule::new("leads", [Trigger::LeadCreated, Trigger::ProfileUpdated]);

        assert!(rule.matches(&DomainEvent::LeadCreated { id: 1 }));
        assert!(rule.matches(&DomainEvent::ProfileUpdated { id: 1 }));
        assert!(!rule.matches(&DomainEvent::ContentSaved { id: 1 }));
    }

    #[test]
    fn bind_appends_entity_id() {
        let ctx = EventContext::from_event(&DomainEvent::LeadCreated { id: 42 });
        assert_eq!(ctx.bind("prospect_"), "prospect_42");
        assert_eq!(ctx.bind("lead_"), "lead_42");
    }

    #[test]
    fn bind_without_id_is_prefix_alone() {
        let ctx = EventContext {
            entity_type: "setting",
            entity_id: None,
            actor: "rules".to_string(),
        };
        assert_eq!(ctx.bind("settings"), "settings");
    }

    #[test]
    fn builder_defaults() {
        let rule = InvalidationRule::new("r", [Trigger::LeadCreated]);
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.mode, ExecutionMode::Sync);
        assert!(rule.invalidate.is_empty());
        assert!(rule.warm.is_none());
        assert!(rule.cascade.is_empty());
    }
}

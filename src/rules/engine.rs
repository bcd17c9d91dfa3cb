//! Rule engine: event dispatch, request queues, and end-of-request flush.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use crate::deps::DependencyTracker;
use crate::events::{DomainEvent, EventBus};
use crate::page::PageCache;
use crate::scheduler;
use crate::store::FrontCache;
use crate::warm::Warmer;

use super::actions::{
    CascadeTarget, EventContext, ExecutionMode, InvalidateAction, InvalidationRule, PageScope,
    WarmAction,
};

const SOURCE: &str = "rules::engine";

const METRIC_FLUSH_MS: &str = "quizcache_flush_ms";
const METRIC_INVALIDATIONS: &str = "quizcache_invalidations_total";

/// Resolves the canonical page paths an entity change touches.
///
/// The host overrides this to match its routing scheme; the default maps an
/// entity to `/{type}/{id}`.
pub trait PageRouter: Send + Sync {
    fn entity_paths(&self, entity_type: &str, entity_id: Option<&str>) -> Vec<String> {
        match entity_id {
            Some(id) => vec![format!("/{entity_type}/{id}")],
            None => Vec::new(),
        }
    }

    fn home_path(&self) -> String {
        "/".to_string()
    }

    fn listing_paths(&self) -> Vec<String>;
}

/// Router backed by the configured listing paths.
pub struct DefaultPageRouter {
    listing: Vec<String>,
}

impl DefaultPageRouter {
    pub fn new(listing: Vec<String>) -> Self {
        Self { listing }
    }
}

impl PageRouter for DefaultPageRouter {
    fn listing_paths(&self) -> Vec<String> {
        self.listing.clone()
    }
}

struct QueuedInvalidate {
    rule: String,
    action: InvalidateAction,
    ctx: EventContext,
    mode: ExecutionMode,
}

struct QueuedWarm {
    rule: String,
    action: WarmAction,
    ctx: EventContext,
}

/// Matches domain events against the registered rules and executes the
/// resulting actions.
///
/// Invalidate actions queue until [`RuleEngine::flush_end_of_request`];
/// cascades execute synchronously inside [`RuleEngine::dispatch`], before it
/// returns. Failed actions are logged and never retried or rolled back.
pub struct RuleEngine {
    rules: Vec<InvalidationRule>,
    front: Arc<FrontCache>,
    pages: Arc<PageCache>,
    deps: Arc<DependencyTracker>,
    bus: Arc<EventBus>,
    router: Arc<dyn PageRouter>,
    warmer: Option<Arc<dyn Warmer>>,
    invalidate_queue: Mutex<VecDeque<QueuedInvalidate>>,
    warm_queue: Mutex<VecDeque<QueuedWarm>>,
}

impl RuleEngine {
    pub fn new(
        mut rules: Vec<InvalidationRule>,
        front: Arc<FrontCache>,
        pages: Arc<PageCache>,
        deps: Arc<DependencyTracker>,
        bus: Arc<EventBus>,
        router: Arc<dyn PageRouter>,
    ) -> Self {
        // Higher-priority rules queue their actions first.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules,
            front,
            pages,
            deps,
            bus,
            router,
            warmer: None,
            invalidate_queue: Mutex::new(VecDeque::new()),
            warm_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_warmer(mut self, warmer: Arc<dyn Warmer>) -> Self {
        self.warmer = Some(warmer);
        self
    }

    /// Match an event against the rules: queue invalidate/warm actions and
    /// execute cascades synchronously.
    #[instrument(skip(self), fields(event = ?event.trigger()))]
    pub fn dispatch(&self, event: &DomainEvent) {
        let ctx = EventContext::from_event(event);
        let mut matched = 0usize;

        for rule in &self.rules {
            if !rule.matches(event) {
                continue;
            }
            matched += 1;
            debug!(rule = %rule.name, "rule triggered");

            {
                let mut queue =
                    crate::lock::mutex_lock(&self.invalidate_queue, SOURCE, "dispatch.invalidate");
                for action in &rule.invalidate {
                    queue.push_back(QueuedInvalidate {
                        rule: rule.name.clone(),
                        action: action.clone(),
                        ctx: ctx.clone(),
                        mode: rule.mode,
                    });
                }
            }

            if let Some(warm) = &rule.warm {
                crate::lock::mutex_lock(&self.warm_queue, SOURCE, "dispatch.warm").push_back(
                    QueuedWarm {
                        rule: rule.name.clone(),
                        action: warm.clone(),
                        ctx: ctx.clone(),
                    },
                );
            }

            // Cascades are not deferred: they run before dispatch returns.
            for target in &rule.cascade {
                self.run_cascade(&rule.name, target, &ctx);
            }
        }

        if matched == 0 {
            debug!("no rule matched");
        }
    }

    /// Drain the event bus and dispatch every pending event.
    pub fn drain_bus(&self) {
        for published in self.bus.drain() {
            self.dispatch(&published.event);
        }
    }

    fn run_cascade(&self, rule: &str, target: &CascadeTarget, ctx: &EventContext) {
        match target {
            CascadeTarget::Group(group) => {
                if let Err(err) = self.front.flush_group(group) {
                    warn!(rule, group, error = %err, "cascade group flush failed");
                }
                self.record(ctx, "cascade", &format!("flush_group {group}"));
            }
            CascadeTarget::QuizPages => {
                let purged = self.pages.purge_quiz();
                self.record(ctx, "cascade", &format!("purge_quiz_pages ({purged})"));
            }
            CascadeTarget::AllPages => {
                if let Err(err) = self.pages.purge_all() {
                    warn!(rule, error = %err, "cascade page purge failed");
                }
                self.record(ctx, "cascade", "purge_all_pages");
            }
            CascadeTarget::Custom(name) => {
                // Not ours to resolve; forward for host listeners.
                self.bus.publish(DomainEvent::Cascade {
                    target: name.clone(),
                    entity_id: ctx.entity_id.clone(),
                });
            }
        }
    }

    /// Execute the queued actions for this request.
    ///
    /// The invalidate queue runs in FIFO order; items flagged async and the
    /// entire warm queue are handed to the background scheduler instead.
    /// Returns the number of invalidate items executed inline.
    #[instrument(skip(self))]
    pub async fn flush_end_of_request(&self) -> usize {
        let started_at = Instant::now();

        let items: Vec<QueuedInvalidate> =
            crate::lock::mutex_lock(&self.invalidate_queue, SOURCE, "flush.invalidate")
                .drain(..)
                .collect();
        let warm_items: Vec<QueuedWarm> =
            crate::lock::mutex_lock(&self.warm_queue, SOURCE, "flush.warm")
                .drain(..)
                .collect();

        if items.is_empty() && warm_items.is_empty() {
            return 0;
        }

        info!(
            invalidations = items.len(),
            warms = warm_items.len(),
            "flushing request queues"
        );

        let mut executed = 0usize;
        for item in items {
            match item.mode {
                ExecutionMode::Sync => {
                    self.execute_invalidate(&item);
                    executed += 1;
                }
                ExecutionMode::Async => {
                    let front = Arc::clone(&self.front);
                    let pages = Arc::clone(&self.pages);
                    let deps = Arc::clone(&self.deps);
                    let router = Arc::clone(&self.router);
                    scheduler::spawn_once("invalidate", async move {
                        execute_invalidate_with(&front, &pages, &deps, router.as_ref(), &item);
                    });
                }
            }
        }

        if let Some(warmer) = &self.warmer {
            for item in warm_items {
                let warmer = Arc::clone(warmer);
                scheduler::spawn_once("warm", async move {
                    warmer.warm(&item.action, &item.ctx).await;
                });
            }
        } else if !warm_items.is_empty() {
            debug!(count = warm_items.len(), "warm queue dropped: no warmer wired");
        }

        counter!(METRIC_INVALIDATIONS).increment(executed as u64);
        histogram!(METRIC_FLUSH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        executed
    }

    fn execute_invalidate(&self, item: &QueuedInvalidate) {
        execute_invalidate_with(
            &self.front,
            &self.pages,
            &self.deps,
            self.router.as_ref(),
            item,
        );
    }

    fn record(&self, ctx: &EventContext, actor: &str, action: &str) {
        self.deps.record(
            ctx.entity_type,
            ctx.entity_id.as_deref().unwrap_or("-"),
            actor,
            action,
        );
    }

    pub fn pending_invalidations(&self) -> usize {
        crate::lock::mutex_lock(&self.invalidate_queue, SOURCE, "pending_invalidations").len()
    }

    pub fn pending_warms(&self) -> usize {
        crate::lock::mutex_lock(&self.warm_queue, SOURCE, "pending_warms").len()
    }
}

fn execute_invalidate_with(
    front: &FrontCache,
    pages: &PageCache,
    deps: &DependencyTracker,
    router: &dyn PageRouter,
    item: &QueuedInvalidate,
) {
    let ctx = &item.ctx;
    let description = match &item.action {
        InvalidateAction::DeleteKey { group, key_prefix } => {
            let key = ctx.bind(key_prefix);
            if let Err(err) = front.delete(&key, group) {
                warn!(rule = %item.rule, group, key, error = %err, "delete failed");
            }
            format!("delete {group}:{key}")
        }
        InvalidateAction::FlushGroup { group } => {
            if let Err(err) = front.flush_group(group) {
                warn!(rule = %item.rule, group, error = %err, "group flush failed");
            }
            format!("flush_group {group}")
        }
        InvalidateAction::ClearTag { tag_prefix } => {
            let tag = ctx.bind(tag_prefix);
            let count = front.clear_by_tag(&tag);
            format!("clear_tag {tag} ({count})")
        }
        InvalidateAction::PurgePages { scope } => {
            purge_pages(pages, router, *scope, ctx);
            format!("purge_pages {scope:?}")
        }
    };

    deps.record(
        ctx.entity_type,
        ctx.entity_id.as_deref().unwrap_or("-"),
        &ctx.actor,
        &description,
    );
}

fn purge_pages(pages: &PageCache, router: &dyn PageRouter, scope: PageScope, ctx: &EventContext) {
    match scope {
        PageScope::Entity => {
            let mut paths = router.entity_paths(ctx.entity_type, ctx.entity_id.as_deref());
            paths.push(router.home_path());
            paths.extend(router.listing_paths());
            for path in paths {
                pages.purge_path(&path);
            }
        }
        PageScope::Home => {
            pages.purge_path(&router.home_path());
        }
        PageScope::Listings => {
            for path in router.listing_paths() {
                pages.purge_path(&path);
            }
        }
        PageScope::QuizFlow => {
            pages.purge_quiz();
        }
        PageScope::All => {
            if let Err(err) = pages.purge_all() {
                warn!(error = %err, "page purge failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::CacheConfig;
    use crate::events::Trigger;
    use crate::store::{CacheGroup, GroupKind, GroupRegistry, MemoryStore};

    use super::*;

    fn build_engine(rules: Vec<InvalidationRule>) -> (RuleEngine, Arc<FrontCache>) {
        let groups = Arc::new(GroupRegistry::new(None, Duration::from_secs(3600)));
        groups.register(CacheGroup::new("prospects", GroupKind::Persistent));
        groups.register(CacheGroup::new("quizzes", GroupKind::Persistent));
        groups.register(CacheGroup::new("pages", GroupKind::Persistent));

        let front = Arc::new(FrontCache::new(
            groups,
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
        ));
        let config = CacheConfig::default();
        let pages = Arc::new(PageCache::new(Arc::clone(&front), &config));
        let deps = Arc::new(DependencyTracker::new(
            NonZeroUsize::new(64).expect("nonzero"),
            NonZeroUsize::new(10).expect("nonzero"),
        ));
        let bus = Arc::new(EventBus::new());
        let router = Arc::new(DefaultPageRouter::new(vec!["/archive".to_string()]));

        let engine = RuleEngine::new(rules, Arc::clone(&front), pages, deps, bus, router);
        (engine, front)
    }

    #[tokio::test]
    async fn lead_created_invalidates_prospect() {
        let rules = vec![
            InvalidationRule::new("lead-prospects", [Trigger::LeadCreated]).invalidate(
                InvalidateAction::DeleteKey {
                    group: "prospects".to_string(),
                    key_prefix: "prospect_".to_string(),
                },
            ),
        ];
        let (engine, front) = build_engine(rules);

        front
            .set("prospect_42", json!({"email": "a@b.c"}), "prospects", None, &[])
            .expect("set");

        engine.dispatch(&DomainEvent::LeadCreated { id: 42 });
        // Queued, not yet executed.
        assert!(front.get("prospect_42", "prospects").is_some());
        assert_eq!(engine.pending_invalidations(), 1);

        engine.flush_end_of_request().await;
        assert!(front.get("prospect_42", "prospects").is_none());
        assert_eq!(engine.pending_invalidations(), 0);
    }

    #[tokio::test]
    async fn queue_executes_fifo_and_records_history() {
        let rules = vec![
            InvalidationRule::new("first", [Trigger::ContentSaved])
                .priority(20)
                .invalidate(InvalidateAction::FlushGroup {
                    group: "prospects".to_string(),
                }),
            InvalidationRule::new("second", [Trigger::ContentSaved])
                .priority(5)
                .invalidate(InvalidateAction::FlushGroup {
                    group: "quizzes".to_string(),
                }),
        ];
        let (engine, _front) = build_engine(rules);

        engine.dispatch(&DomainEvent::ContentSaved { id: 7 });
        assert_eq!(engine.flush_end_of_request().await, 2);

        let history = engine.deps.history("content", "7");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "flush_group prospects");
        assert_eq!(history[1].action, "flush_group quizzes");
    }

    #[tokio::test]
    async fn cascade_group_flush_runs_synchronously() {
        let rules = vec![
            InvalidationRule::new("quiz-questions", [Trigger::QuizQuestionsUpdated])
                .cascade(CascadeTarget::Group("quizzes".to_string())),
        ];
        let (engine, front) = build_engine(rules);

        front
            .set("quiz_7", json!({"questions": 12}), "quizzes", None, &[])
            .expect("set");

        // No flush needed: cascades run inside dispatch.
        engine.dispatch(&DomainEvent::QuizQuestionsUpdated { quiz_id: 7 });
        assert!(front.get("quiz_7", "quizzes").is_none());
    }

    #[tokio::test]
    async fn unknown_cascade_target_is_forwarded_on_the_bus() {
        let rules = vec![
            InvalidationRule::new("custom", [Trigger::LeadCreated])
                .cascade(CascadeTarget::Custom("crm-sync".to_string())),
        ];
        let (engine, _front) = build_engine(rules);

        engine.dispatch(&DomainEvent::LeadCreated { id: 42 });

        let forwarded = engine.bus.drain();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(
            forwarded[0].event,
            DomainEvent::Cascade {
                target: "crm-sync".to_string(),
                entity_id: Some("42".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn clear_tag_action_binds_entity_id() {
        let rules = vec![
            InvalidationRule::new("lead-tags", [Trigger::LeadCreated]).invalidate(
                InvalidateAction::ClearTag {
                    tag_prefix: "lead_".to_string(),
                },
            ),
        ];
        let (engine, front) = build_engine(rules);

        front
            .set(
                "prospect_42",
                json!(1),
                "prospects",
                None,
                &["lead_42".to_string()],
            )
            .expect("set");

        engine.dispatch(&DomainEvent::LeadCreated { id: 42 });
        engine.flush_end_of_request().await;

        assert!(front.get("prospect_42", "prospects").is_none());
    }

    #[tokio::test]
    async fn async_items_execute_off_the_request_path() {
        let rules = vec![
            InvalidationRule::new("async-flush", [Trigger::SettingChanged])
                .mode(ExecutionMode::Async)
                .invalidate(InvalidateAction::FlushGroup {
                    group: "prospects".to_string(),
                }),
        ];
        let (engine, front) = build_engine(rules);

        front
            .set("prospect_1", json!(1), "prospects", None, &[])
            .expect("set");

        engine.dispatch(&DomainEvent::SettingChanged {
            name: "theme".to_string(),
        });
        // Inline count is zero; the work was handed to the scheduler.
        assert_eq!(engine.flush_end_of_request().await, 0);

        // Let the spawned task run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(front.get("prospect_1", "prospects").is_none());
    }

    #[tokio::test]
    async fn unmatched_event_queues_nothing() {
        let rules = vec![
            InvalidationRule::new("leads", [Trigger::LeadCreated]).invalidate(
                InvalidateAction::FlushGroup {
                    group: "prospects".to_string(),
                },
            ),
        ];
        let (engine, _front) = build_engine(rules);

        engine.dispatch(&DomainEvent::ContentSaved { id: 1 });
        assert_eq!(engine.pending_invalidations(), 0);
        assert_eq!(engine.flush_end_of_request().await, 0);
    }
}

//! Typed domain event bus.
//!
//! The host framework's native hook system adapts its events into
//! [`DomainEvent`] values; the core never matches on string event names.
//! Events carry the triggering entity's identifier and queue in FIFO order
//! until the rule engine drains them.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::lock::mutex_lock;

const SOURCE: &str = "events";

/// Domain events that drive cache invalidation.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    // Content
    ContentSaved { id: u64 },
    ContentDeleted { id: u64 },
    // Taxonomy
    TermUpdated { id: u64 },
    TermDeleted { id: u64 },
    // Viewer profiles
    ProfileUpdated { id: u64 },
    ProfileDeleted { id: u64 },
    ProfileRegistered { id: u64 },
    // Configuration values
    SettingChanged { name: String },
    SettingAdded { name: String },
    SettingRemoved { name: String },
    // Product-specific
    QuizCategoryUpdated { id: u64 },
    QuizQuestionsUpdated { quiz_id: u64 },
    QuizResultSaved { id: u64 },
    LeadCreated { id: u64 },
    /// A cascade target the engine did not recognize, forwarded for host
    /// listeners to handle.
    Cascade {
        target: String,
        entity_id: Option<String>,
    },
}

impl DomainEvent {
    /// The trigger this event matches against rule trigger sets.
    pub fn trigger(&self) -> Trigger {
        match self {
            Self::ContentSaved { .. } => Trigger::ContentSaved,
            Self::ContentDeleted { .. } => Trigger::ContentDeleted,
            Self::TermUpdated { .. } => Trigger::TermUpdated,
            Self::TermDeleted { .. } => Trigger::TermDeleted,
            Self::ProfileUpdated { .. } => Trigger::ProfileUpdated,
            Self::ProfileDeleted { .. } => Trigger::ProfileDeleted,
            Self::ProfileRegistered { .. } => Trigger::ProfileRegistered,
            Self::SettingChanged { .. } => Trigger::SettingChanged,
            Self::SettingAdded { .. } => Trigger::SettingAdded,
            Self::SettingRemoved { .. } => Trigger::SettingRemoved,
            Self::QuizCategoryUpdated { .. } => Trigger::QuizCategoryUpdated,
            Self::QuizQuestionsUpdated { .. } => Trigger::QuizQuestionsUpdated,
            Self::QuizResultSaved { .. } => Trigger::QuizResultSaved,
            Self::LeadCreated { .. } => Trigger::LeadCreated,
            Self::Cascade { .. } => Trigger::Cascade,
        }
    }

    /// The triggering entity's identifier, formatted for key binding.
    pub fn entity_id(&self) -> Option<String> {
        match self {
            Self::ContentSaved { id }
            | Self::ContentDeleted { id }
            | Self::TermUpdated { id }
            | Self::TermDeleted { id }
            | Self::ProfileUpdated { id }
            | Self::ProfileDeleted { id }
            | Self::ProfileRegistered { id }
            | Self::QuizCategoryUpdated { id }
            | Self::QuizResultSaved { id }
            | Self::LeadCreated { id } => Some(id.to_string()),
            Self::QuizQuestionsUpdated { quiz_id } => Some(quiz_id.to_string()),
            Self::SettingChanged { name }
            | Self::SettingAdded { name }
            | Self::SettingRemoved { name } => Some(name.clone()),
            Self::Cascade { entity_id, .. } => entity_id.clone(),
        }
    }

    /// Entity type label for dependency-tracker records.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::ContentSaved { .. } | Self::ContentDeleted { .. } => "content",
            Self::TermUpdated { .. } | Self::TermDeleted { .. } => "term",
            Self::ProfileUpdated { .. }
            | Self::ProfileDeleted { .. }
            | Self::ProfileRegistered { .. } => "profile",
            Self::SettingChanged { .. }
            | Self::SettingAdded { .. }
            | Self::SettingRemoved { .. } => "setting",
            Self::QuizCategoryUpdated { .. } => "quiz_category",
            Self::QuizQuestionsUpdated { .. } => "quiz",
            Self::QuizResultSaved { .. } => "quiz_result",
            Self::LeadCreated { .. } => "lead",
            Self::Cascade { .. } => "cascade",
        }
    }
}

/// Event discriminant used in rule trigger sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    ContentSaved,
    ContentDeleted,
    TermUpdated,
    TermDeleted,
    ProfileUpdated,
    ProfileDeleted,
    ProfileRegistered,
    SettingChanged,
    SettingAdded,
    SettingRemoved,
    QuizCategoryUpdated,
    QuizQuestionsUpdated,
    QuizResultSaved,
    LeadCreated,
    Cascade,
}

/// A published event with ordering and correlation metadata.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    /// Unique identifier for log correlation.
    pub id: Uuid,
    /// Monotonic sequence number within this process.
    pub seq: u64,
    pub event: DomainEvent,
    pub published_at: OffsetDateTime,
}

/// In-memory FIFO event bus.
///
/// Write operations publish; the rule engine drains at end-of-request. A
/// mutex is enough since contention is a handful of events per request.
pub struct EventBus {
    queue: Mutex<VecDeque<PublishedEvent>>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: DomainEvent) {
        let published = PublishedEvent {
            id: Uuid::new_v4(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            event,
            published_at: OffsetDateTime::now_utc(),
        };

        info!(
            event_id = %published.id,
            event_seq = published.seq,
            event = ?published.event,
            "domain event published"
        );

        mutex_lock(&self.queue, SOURCE, "publish").push_back(published);
    }

    /// Drain all pending events in FIFO order.
    pub fn drain(&self) -> Vec<PublishedEvent> {
        mutex_lock(&self.queue, SOURCE, "drain").drain(..).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

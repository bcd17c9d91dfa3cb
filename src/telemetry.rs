//! Tracing subscriber setup and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::error::CacheError;

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

/// Install a global tracing subscriber using the provided settings.
pub fn init(settings: &TelemetrySettings) -> Result<(), CacheError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(settings.level.into())
        .from_env_lossy();

    let fmt_layer = match settings.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            CacheError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quizcache_front_hit_total",
            Unit::Count,
            "Total number of front-cache hits."
        );
        describe_counter!(
            "quizcache_front_miss_total",
            Unit::Count,
            "Total number of front-cache misses."
        );
        describe_counter!(
            "quizcache_tag_clear_total",
            Unit::Count,
            "Total number of entries removed by tag clears."
        );
        describe_counter!(
            "quizcache_page_hit_total",
            Unit::Count,
            "Total number of page-cache hits."
        );
        describe_counter!(
            "quizcache_page_miss_total",
            Unit::Count,
            "Total number of page-cache misses."
        );
        describe_counter!(
            "quizcache_invalidations_total",
            Unit::Count,
            "Total number of invalidation actions executed."
        );
        describe_histogram!(
            "quizcache_flush_ms",
            Unit::Milliseconds,
            "End-of-request flush latency in milliseconds."
        );
    });
}

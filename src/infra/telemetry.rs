use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
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
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quire_render_cache_hit_total",
            Unit::Count,
            "Render requests served from a published artifact."
        );
        describe_counter!(
            "quire_render_cache_miss_total",
            Unit::Count,
            "Render requests that found no published artifact."
        );
        describe_counter!(
            "quire_render_coalesced_total",
            Unit::Count,
            "Cache misses that joined a render already in flight."
        );
        describe_counter!(
            "quire_render_not_found_total",
            Unit::Count,
            "Renders that ended because the template does not exist."
        );
        describe_counter!(
            "quire_render_failed_total",
            Unit::Count,
            "Renders that failed, labelled by failure kind."
        );
        describe_counter!(
            "quire_render_published_total",
            Unit::Count,
            "Artifacts written to the cache directory."
        );
        describe_histogram!(
            "quire_render_compile_ms",
            Unit::Milliseconds,
            "External compiler latency in milliseconds."
        );
    });
}

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

/// Install the global tracing subscriber and describe the cache metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    // stdout is reserved for command reports.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
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
            "pwa_cache_hit_total",
            Unit::Count,
            "Total number of cache lookups that found a stored response."
        );
        describe_counter!(
            "pwa_cache_miss_total",
            Unit::Count,
            "Total number of cache lookups that found nothing."
        );
        describe_counter!(
            "pwa_cache_network_error_total",
            Unit::Count,
            "Total number of fetches that produced no HTTP response."
        );
        describe_counter!(
            "pwa_cache_evict_total",
            Unit::Count,
            "Total number of entries removed by the sweeper, by reason."
        );
        describe_counter!(
            "pwa_cache_background_task_failed_total",
            Unit::Count,
            "Total number of detached refresh tasks that failed."
        );
        describe_histogram!(
            "pwa_cache_sweep_ms",
            Unit::Milliseconds,
            "Duration of a full sweep over the live partitions."
        );
    });
}

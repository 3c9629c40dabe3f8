use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::{polls, resolve, sanitize, titles};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            sanitize::METRIC_EXTRACTED,
            Unit::Count,
            "Total number of inline payloads moved into the blob store."
        );
        describe_counter!(
            sanitize::METRIC_REUSED,
            Unit::Count,
            "Total number of inline payloads mapped onto an existing reference."
        );
        describe_counter!(
            sanitize::METRIC_ANOMALY,
            Unit::Count,
            "Total number of payload-like literals left in place by the sanitizer."
        );
        describe_counter!(
            resolve::METRIC_PLACEHOLDER,
            Unit::Count,
            "Total number of references rendered as placeholders."
        );
        describe_counter!(
            polls::METRIC_VOTES,
            Unit::Count,
            "Total number of ballots by outcome."
        );
        describe_counter!(
            titles::METRIC_TITLE_FETCH,
            Unit::Count,
            "Total number of embed title fetches by outcome."
        );
    });
}

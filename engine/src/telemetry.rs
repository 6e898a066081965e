//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for the `weave` binary and for embedders that
//! want the engine's pipeline logs. The level comes from `[core] log_level`,
//! `RUST_LOG` overrides it, and the output format comes from `[core] log_format`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty in debug builds, JSON in release builds
    #[default]
    Auto,
    Pretty,
    Json,
}

impl LogFormat {
    fn resolve(self) -> LogFormat {
        match self {
            LogFormat::Auto if cfg!(debug_assertions) => LogFormat::Pretty,
            LogFormat::Auto => LogFormat::Json,
            other => other,
        }
    }
}

/// Build the filter for a configured level
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
fn env_filter(log_level: &str) -> EnvFilter {
    let default_filter = format!("{},weave_engine={},sqlx=warn", log_level, log_level);
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialize the tracing subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_telemetry_with(log_level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(log_level));

    match format.resolve() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok(),
        _ => registry
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok(),
    };
}

/// Initialize with a level and the build-dependent format
pub fn init_telemetry_with_level(log_level: &str) {
    init_telemetry_with(log_level, LogFormat::Auto);
}

/// Initialize the tracing subscriber with default settings.
///
/// Falls back to "info" level if no `RUST_LOG` env var is set.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

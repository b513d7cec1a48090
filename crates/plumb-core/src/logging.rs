//! Tracing subscriber setup for embedders, tests, and benchmarks
//!
//! The engine itself only emits `tracing` events; nothing is printed unless a
//! subscriber is installed, either by the host application or through
//! [`init_logging`].

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for log output
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `plumb_core=debug`
    pub filter: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Include event targets in the output
    pub with_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "plumb_core=info".to_string(), json: false, with_targets: true }
    }
}

impl LoggingConfig {
    /// Create configuration from environment variables
    ///
    /// `PLUMB_LOG` sets the filter and `PLUMB_LOG_FORMAT=json` switches to JSON.
    pub fn from_environment() -> Self {
        let defaults = Self::default();
        Self {
            filter: std::env::var("PLUMB_LOG").unwrap_or(defaults.filter),
            json: std::env::var("PLUMB_LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            with_targets: defaults.with_targets,
        }
    }
}

/// Install a global subscriber
///
/// Calling this after a subscriber is already installed is a no-op.
pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(config.with_targets)).try_init()
    } else {
        registry.with(fmt::layer().with_target(config.with_targets)).try_init()
    };

    if installed.is_ok() {
        info!(filter = %config.filter, json = config.json, "Initialized logging");
    }
    Ok(())
}

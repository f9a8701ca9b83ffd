//! Subscriber setup for tidemark's tracing output.
//!
//! The engine logs through the `tracing` macros at all times. Output is only
//! emitted once a subscriber is installed, either by the host application or by
//! [`init`] when the `tracing-subscriber` feature is enabled.
//!
//! # Environment Variables
//!
//! - `TIDEMARK_DEBUG=true|1|yes` - Enable debug logging
//! - `TIDEMARK_LOG_LEVEL=trace|debug|info|warn|error` - Set the log level
//! - `TIDEMARK_LOG_FORMAT=json|pretty|compact` - Set the output format (default: compact)

use std::env;
use std::fmt;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "TIDEMARK_DEBUG";
const LEVEL_VAR: &str = "TIDEMARK_LOG_LEVEL";
const FORMAT_VAR: &str = "TIDEMARK_LOG_FORMAT";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human output.
    Pretty,
    /// Single-line human output.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Whether logging was requested at all.
    pub enabled: bool,
    /// Level directive.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
}

impl LogSettings {
    /// Read settings from the environment.
    pub fn from_env() -> Self {
        Self::resolve(
            env::var(DEBUG_VAR).ok().as_deref(),
            env::var(LEVEL_VAR).ok().as_deref(),
            env::var(FORMAT_VAR).ok().as_deref(),
        )
    }

    /// Resolve settings from raw variable values.
    pub fn resolve(debug: Option<&str>, level: Option<&str>, format: Option<&str>) -> Self {
        let debug = debug.is_some_and(is_truthy);
        let fallback = if debug { "debug" } else { "warn" };
        let resolved = match level.map(str::to_lowercase).as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => fallback,
        };

        Self {
            enabled: debug || level.is_some(),
            level: resolved,
            format: format.map(LogFormat::parse).unwrap_or(LogFormat::Compact),
        }
    }

    /// Filter directive covering the tidemark crates.
    pub fn directive(&self) -> String {
        format!("tidemark={},tidemark_migrate={}", self.level, self.level)
    }
}

/// Check if debug logging is enabled via `TIDEMARK_DEBUG`.
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR).is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Install a subscriber according to the environment.
///
/// Subsequent calls are no-ops. Nothing is installed unless `TIDEMARK_DEBUG` or
/// `TIDEMARK_LOG_LEVEL` is set.
pub fn init() {
    INIT.call_once(|| {
        let settings = LogSettings::from_env();
        if !settings.enabled {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(settings.directive())
                .unwrap_or_else(|_| EnvFilter::new("warn"));
            let registry = tracing_subscriber::registry().with(filter);

            let installed = match settings.format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = settings.level,
                    format = %settings.format,
                    "Tidemark logging initialized"
                );
            }
        }
    });
}

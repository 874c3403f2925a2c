//! Logging setup for processes embedding the lookup core.
//!
//! The core only emits `tracing` events. Whoever owns the process calls
//! [`init_logging`] once at startup to install a subscriber.

use std::env;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Primary log filter (RUST_LOG env var)
    pub log_filter: String,
    /// Fallback log level if RUST_LOG not set
    pub default_level: String,
    /// Log format ("human" or "json")
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Human,
    Json,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let default_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self::from_env_with_defaults(default_level)
    }
}

impl TelemetryConfig {
    /// Build from the environment, using `settings.log_level` when neither
    /// `RUST_LOG` nor `LOG_LEVEL` is set.
    pub fn with_settings(settings: &TelemetrySettings) -> Self {
        let default_level = env::var("LOG_LEVEL").unwrap_or_else(|_| settings.log_level.clone());
        Self::from_env_with_defaults(default_level)
    }

    fn from_env_with_defaults(default_level: String) -> Self {
        Self {
            log_filter: env::var("RUST_LOG").unwrap_or_default(),
            default_level,
            log_format: match env::var("LOG_FORMAT")
                .unwrap_or_default()
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Human,
            },
        }
    }
}

/// Logging options carried in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Level used when neither RUST_LOG nor LOG_LEVEL is set.
    pub log_level: String,
    /// Log rendered query text at debug level. Off by default: query text
    /// names the shard and the parameter slots, never the bound values.
    pub log_query_text: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_query_text: false,
        }
    }
}

/// Initialize logging.
///
/// Safe to call multiple times - will only initialize once.
pub fn init_logging(config: &TelemetryConfig) {
    // Check if a global subscriber is already set (e.g., from tests)
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("tracing subscriber already initialized, skipping");
        return;
    }

    let filter = if config.log_filter.is_empty() {
        EnvFilter::new(&config.default_level)
    } else {
        EnvFilter::new(&config.log_filter)
    };

    // JSON output needs tracing-subscriber's `json` feature; until then both
    // formats use the compact layer.
    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().compact().boxed(),
        LogFormat::Human => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    // try_init: another thread may have won the race since has_been_set().
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = TelemetryConfig {
            log_filter: String::new(),
            default_level: "debug".to_string(),
            log_format: LogFormat::Human,
        };
        init_logging(&config);
        init_logging(&config);
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_settings_defaults() {
        let settings: TelemetrySettings = toml::from_str("").unwrap();
        assert_eq!(settings, TelemetrySettings::default());
        assert!(!settings.log_query_text);
    }
}

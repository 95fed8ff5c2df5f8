//! Tracing subscriber setup for the CLI.

use staylens_core::{ConfigError, StaylensResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "staylens=info,staylens_insights=info,warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines on stderr.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `STAYLENS_LOG_FORMAT` (`json` or `pretty`).
    pub fn from_env() -> StaylensResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> StaylensResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("STAYLENS_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "STAYLENS_LOG_FORMAT".to_string(),
                    value: other.to_string(),
                    reason: "expected 'json' or 'pretty'".to_string(),
                }
                .into())
            }
        };
        Ok(Self {
            format,
            ..Self::default()
        })
    }
}

/// Install the global subscriber. Call once, before any logging.
///
/// Logs go to stderr so stdout carries only command output.
pub fn init_tracing(config: &TelemetryConfig) -> StaylensResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| {
        ConfigError::InvalidValue {
            field: "RUST_LOG".to_string(),
            value: config.default_filter.clone(),
            reason: format!("failed to install subscriber: {}", e),
        }
        .into()
    })
}

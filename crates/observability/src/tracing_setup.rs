//! Subscriber construction: env filter plus a JSON or plain formatter.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log shipping.
    #[default]
    Json,
    /// Human-readable lines for local development.
    Plain,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "plain" | "pretty" | "text" => Some(Self::Plain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives, e.g. `info,storefront_fulfillment=debug`.
    pub filter: String,
    pub format: LogFormat,
    /// Route output through the test harness capture instead of stdout.
    pub test_writer: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
            test_writer: false,
        }
    }
}

impl ObservabilityConfig {
    /// `RUST_LOG` and `STOREFRONT_LOG_FORMAT`; unset or unknown values keep the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            filter: lookup("RUST_LOG")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(defaults.filter),
            format: lookup("STOREFRONT_LOG_FORMAT")
                .and_then(|raw| LogFormat::parse(&raw))
                .unwrap_or(defaults.format),
            test_writer: false,
        }
    }

    /// Plain output captured by `cargo test`, at the given filter.
    pub fn for_tests(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            format: LogFormat::Plain,
            test_writer: true,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

pub(crate) fn init(config: &ObservabilityConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    // `try_init` fails once a global subscriber exists; later calls are no-ops.
    let _ = match (config.format, config.test_writer) {
        (LogFormat::Json, false) => builder.json().with_target(false).try_init(),
        (LogFormat::Json, true) => builder.json().with_target(false).with_test_writer().try_init(),
        (LogFormat::Plain, false) => builder.with_target(true).try_init(),
        (LogFormat::Plain, true) => builder.with_target(true).with_test_writer().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_filter_and_format() {
        let config = ObservabilityConfig::from_lookup(|var| match var {
            "RUST_LOG" => Some("warn,storefront_fulfillment=debug".to_string()),
            "STOREFRONT_LOG_FORMAT" => Some("Plain".to_string()),
            _ => None,
        });
        assert_eq!(config.filter, "warn,storefront_fulfillment=debug");
        assert_eq!(config.format, LogFormat::Plain);
    }

    #[test]
    fn unknown_format_and_blank_filter_fall_back() {
        let config = ObservabilityConfig::from_lookup(|var| match var {
            "RUST_LOG" => Some("  ".to_string()),
            "STOREFRONT_LOG_FORMAT" => Some("xml".to_string()),
            _ => None,
        });
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn invalid_directives_fall_back_to_info() {
        let config = ObservabilityConfig {
            filter: "storefront=verbose".to_string(),
            ..ObservabilityConfig::default()
        };
        assert!(EnvFilter::try_new(&config.filter).is_err());
        assert_eq!(
            config.env_filter().max_level_hint(),
            Some(tracing::level_filters::LevelFilter::INFO)
        );
    }

    #[test]
    fn repeated_init_is_harmless() {
        init(&ObservabilityConfig::for_tests("debug"));
        init(&ObservabilityConfig::for_tests("info"));
        tracing::info!("still logging after a second init");
    }
}

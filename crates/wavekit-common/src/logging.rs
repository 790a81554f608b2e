//! Logging configuration and subscriber setup.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// Human-readable multi-line format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON lines for structured collection.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level when no filter is given.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Include source file and line number.
    pub include_location: bool,
    /// Include thread names.
    pub include_thread_names: bool,
    /// Emit span enter/close events.
    pub include_spans: bool,
    /// Custom filter directives (e.g. `"wavekit=debug,reqwest=warn"`).
    /// Overrides both `level` and the process environment.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_thread_names: false,
            include_spans: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose configuration for debugging worker lifecycles.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_thread_names: true,
            include_spans: true,
            ..Default::default()
        }
    }

    /// Structured JSON output for log collection.
    pub fn json() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Set a custom filter directive string.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match self.filter {
            Some(ref directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install the global tracing subscriber for the given configuration.
///
/// Call once per process; later calls panic the way a second
/// `tracing_subscriber` init always does.
pub fn init_logging(config: LogConfig) {
    let filter = config.env_filter();

    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_names(config.include_thread_names)
                .with_span_events(span_events);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(true)
                .with_span_events(span_events);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_span_events(span_events);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.filter.is_none());
        assert!(!config.include_location);
        assert!(!config.include_thread_names);
    }

    #[test]
    fn test_debug_config() {
        let config = LogConfig::debug();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.include_location);
        assert!(config.include_thread_names);
        assert!(config.include_spans);
    }

    #[test]
    fn test_with_filter() {
        let config = LogConfig::default().with_filter("wavekit=trace");
        assert_eq!(config.filter.as_deref(), Some("wavekit=trace"));
    }

    #[test]
    fn test_custom_filter_wins_over_level() {
        let config = LogConfig::debug().with_filter("wavekit_sw=warn");
        let filter = config.env_filter();
        assert!(filter.to_string().contains("wavekit_sw=warn"));
    }
}

//! Tracing subscriber setup (§4.11), generalized from the teacher's
//! `LoggerImpl`: an `EnvFilter`-driven level, and a JSON-or-pretty formatter
//! chosen by config, with secret scrubbing wired into the formatter itself
//! (a `Layer` ahead of the formatter can't redact what the formatter goes on
//! to write, so redaction lives in the `FormatFields`/`FormatEvent`
//! implementations — see `secret_scrubbing`).

use std::io;

use anyhow::{bail, Result};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::infrastructure::config::{LogFormat, LoggingConfig};
use crate::infrastructure::logging::{RedactingFieldFormat, RedactingJsonFormat};

/// Owns the process's tracing subscriber. Holding this alive for the
/// lifetime of the process is what keeps the subscriber installed; there is
/// no file appender in this crate, so no `WorkerGuard` to carry — logging
/// always goes to stdout, matching §4.12's single-process deployment model.
pub struct Logger;

impl Logger {
    /// Initializes the global tracing subscriber. Call once, at process
    /// start, before any other component logs.
    pub fn init(config: &LoggingConfig, sensitive_keys: Vec<String>) -> Result<Self> {
        let level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

        match config.format {
            LogFormat::Json => {
                // The built-in `.json()` formatter serializes event fields itself
                // and ignores any configured `FormatFields`, so redaction here
                // needs its own `FormatEvent` rather than `.fmt_fields(...)`.
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .event_format(RedactingJsonFormat::new(sensitive_keys))
                    .with_writer(io::stdout);
                tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
            }
            LogFormat::Pretty => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .fmt_fields(RedactingFieldFormat::new(sensitive_keys))
                    .with_writer(io::stdout)
                    .with_target(true);
                tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
            }
        }

        tracing::info!(level = %config.level, format = ?config.format, "logger initialized");
        Ok(Self)
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => bail!("invalid log level: {level}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels_case_insensitively() {
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_log_level("verbose").is_err());
    }
}

//! Process-wide singletons (§4.9): one `Runtime` value threaded explicitly
//! into every long-running component instead of ambient globals.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::domain::ports::ExpressionEngine;
use crate::engine::expression::MiniExpressionEngine;
use crate::infrastructure::config::{ConfigLoader, RuntimeConfig};
use crate::infrastructure::logging::Logger;

/// Owns the process's shared `reqwest::Client`, the loaded configuration,
/// the expression engine implementation, and the tracing subscriber guard.
///
/// Constructed once at process start via [`Runtime::bootstrap`] and passed
/// by reference or `Arc` into the Resync Orchestrator, Event Listener, Live
/// Event Processor Runtime, and Action Execution Manager. Tests construct
/// their own constituent parts directly rather than going through this.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub http: reqwest::Client,
    pub engine: Arc<dyn ExpressionEngine>,
    _logger: Logger,
}

impl Runtime {
    /// Loads configuration, installs the tracing subscriber, and builds the
    /// shared HTTP client. `sensitive_keys` come from the running
    /// integration's declared `IntegrationSpec` and are folded into the
    /// logging layer's redaction deny-list alongside the built-in one.
    pub fn bootstrap(sensitive_keys: Vec<String>) -> anyhow::Result<Self> {
        let config = ConfigLoader::load().context("failed to load configuration")?;
        let logger = Logger::init(&config.logging, sensitive_keys).context("failed to initialize logging")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.portal.timeout_seconds))
            .pool_max_idle_per_host(10)
            .build()
            .context("failed to build shared http client")?;

        Ok(Self { config, http, engine: Arc::new(MiniExpressionEngine), _logger: logger })
    }
}

//! Adapter port traits.
//!
//! These define the interface integration code must implement. The core
//! interacts with a third-party API exclusively through these traits,
//! keeping the engine decoupled from any specific external system.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::EngineError;

/// A lazy, finite sequence of raw-record batches, as yielded by an
/// integration's registered stream for one kind (see design notes on
/// coroutines/generators).
#[async_trait]
pub trait BatchStream: Send {
    /// Pull the next batch. Returns `None` once the stream is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, EngineError>;
}

/// Integration code registers one `IntegrationAdapter` per process; it is
/// asked for a fresh [`BatchStream`] per kind at the start of each resync.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Open a new batch stream for `kind`. Called once per resource config
    /// per resync; the returned stream is not restartable.
    async fn open_stream(&self, kind: &str) -> Result<Box<dyn BatchStream>, EngineError>;
}

/// A live-event processor, registered against one or more HTTP paths.
#[async_trait]
pub trait LiveEventProcessor: Send + Sync {
    fn should_process_event(&self, event: &crate::domain::models::LiveEvent) -> bool;

    fn get_matching_kinds(&self, event: &crate::domain::models::LiveEvent) -> Vec<String>;

    async fn authenticate(&self, payload: &Value, headers: &std::collections::BTreeMap<String, String>) -> bool;

    async fn validate_payload(&self, payload: &Value) -> bool;

    async fn handle_event(
        &self,
        payload: &Value,
        resource_config: &crate::domain::models::ResourceConfig,
    ) -> Result<crate::domain::models::LiveEventOutcome, EngineError>;
}

/// An action executor, registered under its `action_name`.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn action_name(&self) -> &str;

    /// Runs sharing a non-null partition key execute sequentially.
    fn partition_key(&self, run: &crate::domain::models::ActionRun) -> Option<String>;

    fn is_close_to_rate_limit(&self) -> bool;

    fn get_remaining_seconds_until_rate_limit(&self) -> f64;

    /// Performs the action and reports final status via the Portal Client.
    /// A `Result::Err` is treated as an unreported failure and the manager
    /// will patch the run's status itself; a successful executor is
    /// expected to have already reported status on `Ok`.
    async fn execute(&self, run: &crate::domain::models::ActionRun) -> Result<(), EngineError>;
}

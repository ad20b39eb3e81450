//! Ambient per-event state (§4.1): a task-local stack discipline standing
//! in for the source's global "event context". `with_event` opens a scope
//! for the lifetime of a future; nested scopes shadow their parent and are
//! restored automatically when that future resolves, which is what gives
//! us "on close, restores the previous context on this execution path"
//! without a manual pop.

use std::future::Future;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Event, EventType, PortAppConfig, TriggerType};

const APP_CONFIG_ATTRIBUTE: &str = "app_config_snapshot";

tokio::task_local! {
    static CURRENT_EVENT: Event;
}

/// Opens and queries the ambient event for the current execution path.
pub struct EventContext;

impl EventContext {
    /// Opens a new event nested inside `parent` (or a root event if none is
    /// given) and runs `body` with it as the ambient context for the
    /// duration of the returned future.
    pub async fn with_event<F, Fut, T>(
        event_type: EventType,
        trigger_type: TriggerType,
        parent: Option<&Event>,
        body: F,
    ) -> T
    where
        F: FnOnce(Event) -> Fut,
        Fut: Future<Output = T>,
    {
        let event = match parent {
            Some(parent) => parent.child(event_type, trigger_type),
            None => Event::root(event_type, trigger_type),
        };
        CURRENT_EVENT.scope(event.clone(), body(event)).await
    }

    /// The ambient event for the current execution path.
    ///
    /// # Errors
    /// Returns [`EngineError::NoActiveEvent`] if called outside a
    /// [`EventContext::with_event`] scope.
    pub fn current() -> EngineResult<Event> {
        CURRENT_EVENT
            .try_with(Clone::clone)
            .map_err(|_| EngineError::NoActiveEvent)
    }

    /// Marks the ambient event, and all of its descendants, as aborted.
    pub fn abort() -> EngineResult<()> {
        Self::current().map(|event| event.abort())
    }

    /// Cooperative check; callers poll this at safe points (batch and kind
    /// boundaries). Returns `false` (not aborted) when called outside a
    /// context, since there is nothing to abort.
    pub fn is_aborted() -> bool {
        CURRENT_EVENT
            .try_with(Event::is_aborted)
            .unwrap_or(false)
    }

    /// Snapshots `config` onto the ambient event, per §4.1.1: taken once by
    /// the orchestrator for the root resync event, then visible to every
    /// descendant because attributes are shared by reference.
    pub fn set_app_config(config: &PortAppConfig) -> EngineResult<()> {
        let event = Self::current()?;
        let value = serde_json::to_value(config).map_err(|err| EngineError::Config(err.to_string()))?;
        event.set_attribute(APP_CONFIG_ATTRIBUTE, value);
        Ok(())
    }

    /// The app config snapshotted for this resync, per §4.1.1.
    pub fn app_config() -> EngineResult<PortAppConfig> {
        let event = Self::current()?;
        let value = event
            .get_attribute(APP_CONFIG_ATTRIBUTE)
            .ok_or_else(|| EngineError::Config("app config not snapshotted for this event".to_string()))?;
        serde_json::from_value(value).map_err(|err| EngineError::Config(err.to_string()))
    }
}

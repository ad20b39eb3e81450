//! Event tree: the ambient record carried through a resync, live-event, or
//! HTTP-triggered unit of work.

use super::app_config::PortAppConfig;
use super::resource_config::ResourceConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Resync,
    Start,
    HttpRequest,
    LiveEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Machine,
    Request,
}

/// One node in the event tree. Cloning an `Event` is cheap — the abort
/// signal and attribute map are shared (`Arc`) with the rest of the tree,
/// matching the "ambient state" contract in the Event Context component.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub trigger_type: TriggerType,
    pub resource_config: Option<Arc<ResourceConfig>>,
    pub app_config: Option<Arc<PortAppConfig>>,
    pub attributes: Arc<parking_lot::RwLock<BTreeMap<String, Value>>>,
    pub abort_signal: Arc<std::sync::atomic::AtomicBool>,
    pub parent_id: Option<Uuid>,
}

impl Event {
    pub fn root(event_type: EventType, trigger_type: TriggerType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            trigger_type,
            resource_config: None,
            app_config: None,
            attributes: Arc::new(parking_lot::RwLock::new(BTreeMap::new())),
            abort_signal: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            parent_id: None,
        }
    }

    /// Open a child event nested inside `self`: it inherits the abort
    /// signal and attributes by reference, and a fresh `event_id`.
    pub fn child(&self, event_type: EventType, trigger_type: TriggerType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            trigger_type,
            resource_config: self.resource_config.clone(),
            app_config: self.app_config.clone(),
            attributes: Arc::clone(&self.attributes),
            abort_signal: Arc::clone(&self.abort_signal),
            parent_id: Some(self.event_id),
        }
    }

    pub fn with_resource_config(mut self, resource_config: Arc<ResourceConfig>) -> Self {
        self.resource_config = Some(resource_config);
        self
    }

    pub fn with_app_config(mut self, app_config: Arc<PortAppConfig>) -> Self {
        self.app_config = Some(app_config);
        self
    }

    pub fn abort(&self) {
        self.abort_signal
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_signal.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.attributes.write().insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_abort_signal() {
        let root = Event::root(EventType::Resync, TriggerType::Manual);
        let child = root.child(EventType::LiveEvent, TriggerType::Machine);
        assert!(!child.is_aborted());
        root.abort();
        assert!(child.is_aborted(), "abort must propagate to descendants");
    }

    #[test]
    fn child_inherits_attributes_by_reference() {
        let root = Event::root(EventType::Resync, TriggerType::Manual);
        root.set_attribute("cache_key", Value::String("v1".to_string()));
        let child = root.child(EventType::LiveEvent, TriggerType::Machine);
        assert_eq!(
            child.get_attribute("cache_key"),
            Some(Value::String("v1".to_string()))
        );
        child.set_attribute("cache_key", Value::String("v2".to_string()));
        assert_eq!(
            root.get_attribute("cache_key"),
            Some(Value::String("v2".to_string()))
        );
    }

    #[test]
    fn child_gets_fresh_event_id_and_parent_link() {
        let root = Event::root(EventType::Resync, TriggerType::Manual);
        let child = root.child(EventType::LiveEvent, TriggerType::Machine);
        assert_ne!(root.event_id, child.event_id);
        assert_eq!(child.parent_id, Some(root.event_id));
    }
}

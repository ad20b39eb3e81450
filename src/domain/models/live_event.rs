//! Inbound webhook-style events handled by the Live Event Processor Runtime.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub event_id: Uuid,
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Value,
    pub arrived_at: DateTime<Utc>,
}

impl LiveEvent {
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        headers: BTreeMap<String, String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            path: path.into(),
            method: method.into(),
            headers,
            payload,
            arrived_at: Utc::now(),
        }
    }
}

/// Result of a live-event processor's `handle_event` call: the raw records
/// that should be upserted or deleted through the targeted apply path.
#[derive(Debug, Clone, Default)]
pub struct LiveEventOutcome {
    pub updated: Vec<Value>,
    pub deleted: Vec<Value>,
}

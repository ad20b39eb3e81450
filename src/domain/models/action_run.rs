//! Action runs dispatched from the portal for execution against a
//! third-party system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Success,
    Failure,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRun {
    pub id: Uuid,
    pub action_name: String,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub partition_key: Option<String>,
}

impl ActionRun {
    pub fn new(action_name: impl Into<String>, payload: BTreeMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_name: action_name.into(),
            payload,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            partition_key: None,
        }
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// The queue this run belongs to: its partition key, or `None` for the
    /// global queue.
    pub fn queue_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }
}

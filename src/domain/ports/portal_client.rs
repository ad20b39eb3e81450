//! Portal Client port: the operations the core needs from the developer
//! portal's REST API. `infrastructure::portal::ReqwestPortalClient` is the
//! concrete implementation; tests use an in-memory fake.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::PortalError;
use crate::domain::models::{ActionRun, Entity, PortAppConfig};

/// A user-agent label attached to every portal write: `(integration_type,
/// integration_identifier, version, feature)`. Used for ownership-scoped
/// reads/writes and deletions — reconciliation must never touch entities
/// owned by a different `(integration, feature)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgentLabel {
    pub integration_type: String,
    pub integration_identifier: String,
    pub version: String,
    pub feature: String,
}

impl UserAgentLabel {
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} ({}; feature={})",
            self.integration_type, self.version, self.integration_identifier, self.feature
        )
    }
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub id: String,
    pub completed: bool,
    pub failed: bool,
}

#[async_trait]
pub trait PortalClient: Send + Sync {
    async fn get_integration(&self, label: &UserAgentLabel) -> Result<Value, PortalError>;

    async fn update_integration_state(
        &self,
        label: &UserAgentLabel,
        state: &Value,
    ) -> Result<(), PortalError>;

    async fn get_app_config(&self, label: &UserAgentLabel) -> Result<PortAppConfig, PortalError>;

    /// Search for entities matching a query (used both for reconciliation's
    /// `existing_state` fetch and for resolving search-query relations).
    async fn search_entities(&self, query: &Value) -> Result<Vec<Entity>, PortalError>;

    async fn upsert_entities_bulk(
        &self,
        blueprint: &str,
        entities: &[Entity],
        label: &UserAgentLabel,
        merge: bool,
    ) -> Result<(), PortalError>;

    async fn delete_entity(
        &self,
        blueprint: &str,
        identifier: &str,
        label: &UserAgentLabel,
        cascade: bool,
    ) -> Result<(), PortalError>;

    async fn delete_all_entities_for_blueprint(
        &self,
        blueprint: &str,
        label: &UserAgentLabel,
    ) -> Result<String, PortalError>;

    async fn get_migration(&self, id: &str) -> Result<MigrationStatus, PortalError>;

    async fn get_blueprint(&self, id: &str) -> Result<Value, PortalError>;

    async fn patch_blueprint(&self, id: &str, patch: &Value) -> Result<(), PortalError>;

    async fn patch_run(&self, run_id: &uuid::Uuid, patch: &Value) -> Result<(), PortalError>;

    async fn poll_action_runs(
        &self,
        since: Option<chrono::DateTime<chrono::Utc>>,
        limit: usize,
    ) -> Result<Vec<ActionRun>, PortalError>;
}

//! Live Event Processor Runtime (§4.7): per-path ordered queues feeding a
//! dedicated worker each, running registered processors through
//! authenticate/validate/handle_event and the targeted apply path.
//!
//! `authenticate`/`validate_payload` run synchronously in [`LiveEventRuntime::submit`],
//! ahead of enqueueing, so a failure can still produce a real 401/400 at the
//! HTTP boundary (see `IngestOutcome::Unauthorized`/`InvalidPayload` and
//! `infrastructure::http`). `handle_event` stays on the worker, since it is
//! the expensive, retryable step that must preserve per-path ordering.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::errors::EngineError;
use crate::domain::models::{Entity, LiveEvent, LiveEventOutcome, PortAppConfig, ResourceConfig, ResourceMapping};
use crate::domain::ports::{LiveEventProcessor, PortalClient, UserAgentLabel};
use crate::services::entity_processor::{EntityProcessor, RecordClassification};
use crate::services::retry::RetryPolicy;
use crate::services::state_applier::StateApplier;

/// What happened to one inbound request, for the HTTP layer to translate
/// into a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Enqueued,
    UnknownPath,
    ShuttingDown,
    Unauthorized,
    InvalidPayload,
}

struct PathQueue {
    sender: Option<mpsc::Sender<LiveEvent>>,
    worker: JoinHandle<()>,
}

pub struct LiveEventRuntime {
    processors: BTreeMap<String, Vec<Arc<dyn LiveEventProcessor>>>,
    resource_mapping: ResourceMapping,
    entity_processor: Arc<EntityProcessor>,
    state_applier: Arc<StateApplier>,
    app_config: PortAppConfig,
    label: UserAgentLabel,
    retry_policy: RetryPolicy,
    queues: Mutex<BTreeMap<String, PathQueue>>,
}

impl LiveEventRuntime {
    pub fn new(
        processors: BTreeMap<String, Vec<Arc<dyn LiveEventProcessor>>>,
        resource_mapping: ResourceMapping,
        entity_processor: Arc<EntityProcessor>,
        portal: Arc<dyn PortalClient>,
        app_config: PortAppConfig,
        label: UserAgentLabel,
    ) -> Arc<Self> {
        let runtime = Arc::new(Self {
            processors,
            resource_mapping,
            entity_processor,
            state_applier: Arc::new(StateApplier::new(portal)),
            app_config,
            label,
            retry_policy: RetryPolicy::default(),
            queues: Mutex::new(BTreeMap::new()),
        });
        runtime
    }

    /// Spawns one worker per registered path. Must be called once after
    /// construction, before `submit` is used.
    pub async fn start(self: &Arc<Self>) {
        let paths: Vec<String> = self.processors.keys().cloned().collect();
        let mut queues = self.queues.lock().await;
        for path in paths {
            let (tx, rx) = mpsc::channel::<LiveEvent>(256);
            let runtime = Arc::clone(self);
            let worker_path = path.clone();
            let worker = tokio::spawn(async move {
                runtime.run_worker(worker_path, rx).await;
            });
            queues.insert(path, PathQueue { sender: Some(tx), worker });
        }
    }

    /// Runs `authenticate`/`validate_payload` synchronously against any
    /// registered processor that claims this event, then enqueues onto the
    /// path's ordered queue. Authentication and validation must happen here
    /// rather than in the worker: only a synchronous pre-check can produce
    /// the 401/400 the HTTP layer needs to return to the caller, since by
    /// the time a queued event reaches `process_event` the request has
    /// already been acknowledged.
    pub async fn submit(&self, event: LiveEvent) -> IngestOutcome {
        let Some(processors) = self.processors.get(&event.path) else {
            return IngestOutcome::UnknownPath;
        };

        for processor in processors {
            if !processor.should_process_event(&event) {
                continue;
            }
            if let Err(err) = authenticate_and_validate(processor.as_ref(), &event).await {
                warn!(path = %event.path, event_id = %event.event_id, error = %err, "webhook rejected before enqueue");
                return match err {
                    EngineError::WebhookAuthFailed => IngestOutcome::Unauthorized,
                    EngineError::WebhookValidationFailed => IngestOutcome::InvalidPayload,
                    _ => unreachable!("authenticate_and_validate only returns the two webhook errors"),
                };
            }
        }

        let queues = self.queues.lock().await;
        match queues.get(&event.path) {
            Some(PathQueue { sender: Some(tx), .. }) => match tx.send(event).await {
                Ok(()) => IngestOutcome::Enqueued,
                Err(_) => IngestOutcome::ShuttingDown,
            },
            Some(PathQueue { sender: None, .. }) => IngestOutcome::ShuttingDown,
            None => IngestOutcome::UnknownPath,
        }
    }

    /// Stops accepting new events, drains each per-path queue up to `grace`,
    /// then abandons any worker still running.
    pub async fn shutdown(&self, grace: Duration) {
        let mut queues = self.queues.lock().await;
        for queue in queues.values_mut() {
            queue.sender.take();
        }
        let handles: Vec<_> = std::mem::take(&mut *queues).into_values().map(|q| q.worker).collect();
        drop(queues);

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("live event queues did not drain within the shutdown grace window");
        }
    }

    async fn run_worker(self: Arc<Self>, path: String, mut rx: mpsc::Receiver<LiveEvent>) {
        while let Some(event) = rx.recv().await {
            self.process_event(&path, &event).await;
        }
    }

    async fn process_event(&self, path: &str, event: &LiveEvent) {
        let Some(processors) = self.processors.get(path) else {
            return;
        };

        for processor in processors {
            if !processor.should_process_event(event) {
                continue;
            }

            for kind in processor.get_matching_kinds(event) {
                for resource_config in self.resource_mapping.for_kind(&kind) {
                    self.dispatch(processor.as_ref(), event, resource_config).await;
                }
            }
        }
    }

    async fn dispatch(&self, processor: &dyn LiveEventProcessor, event: &LiveEvent, resource_config: &ResourceConfig) {
        // authenticate/validate_payload already ran synchronously in `submit`
        // before this event was ever enqueued.
        let outcome = self
            .retry_policy
            .execute(|| processor.handle_event(&event.payload, resource_config))
            .await;

        match outcome {
            Ok(outcome) => self.apply_outcome(resource_config, outcome).await,
            Err(err) => {
                warn!(error = %err, path = %event.path, event_id = %event.event_id, "handle_event exhausted retries");
            }
        }
    }

    async fn apply_outcome(&self, resource_config: &ResourceConfig, outcome: LiveEventOutcome) {
        let blueprint = &resource_config.port.entity.blueprint;

        let to_upsert: Vec<Entity> = outcome
            .updated
            .iter()
            .flat_map(|record| self.entity_processor.process(record, resource_config))
            .filter(|processed| processed.classification == RecordClassification::PassedSelector)
            .filter_map(|processed| processed.entity)
            .collect();

        let to_delete: Vec<String> = outcome
            .deleted
            .iter()
            .flat_map(|record| self.entity_processor.process(record, resource_config))
            .filter_map(|processed| processed.entity)
            .filter_map(|entity| entity.id().map(str::to_string))
            .collect();

        if to_upsert.is_empty() && to_delete.is_empty() {
            return;
        }

        let report = self.state_applier.apply_targeted(blueprint, to_upsert, &to_delete, &self.app_config, &self.label).await;
        info!(
            blueprint,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failures.len(),
            "targeted apply complete"
        );
    }
}

async fn authenticate_and_validate(processor: &dyn LiveEventProcessor, event: &LiveEvent) -> Result<(), EngineError> {
    if !processor.authenticate(&event.payload, &event.headers).await {
        return Err(EngineError::WebhookAuthFailed);
    }
    if !processor.validate_payload(&event.payload).await {
        return Err(EngineError::WebhookValidationFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{EngineError, PortalError};
    use crate::domain::models::{EntityMapping, PortConfig};
    use crate::engine::expression::MiniExpressionEngine;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn resource_config() -> ResourceConfig {
        ResourceConfig {
            kind: "pull_request".to_string(),
            selector: None,
            port: PortConfig {
                entity: EntityMapping {
                    identifier: ".id".to_string(),
                    blueprint: "pull_request".to_string(),
                    title: Some(".title".to_string()),
                    team: None,
                    properties: Map::new(),
                    relations: Map::new(),
                },
                items_to_parse: None,
            },
        }
    }

    #[derive(Default)]
    struct FakePortal {
        upserted: AsyncMutex<Vec<Entity>>,
        deleted: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl PortalClient for FakePortal {
        async fn get_integration(&self, _label: &UserAgentLabel) -> Result<Value, PortalError> {
            Ok(Value::Null)
        }
        async fn update_integration_state(&self, _label: &UserAgentLabel, _state: &Value) -> Result<(), PortalError> {
            Ok(())
        }
        async fn get_app_config(&self, _label: &UserAgentLabel) -> Result<PortAppConfig, PortalError> {
            unimplemented!()
        }
        async fn search_entities(&self, _query: &Value) -> Result<Vec<Entity>, PortalError> {
            Ok(vec![])
        }
        async fn upsert_entities_bulk(&self, _blueprint: &str, entities: &[Entity], _label: &UserAgentLabel, _merge: bool) -> Result<(), PortalError> {
            self.upserted.lock().await.extend(entities.iter().cloned());
            Ok(())
        }
        async fn delete_entity(&self, _blueprint: &str, identifier: &str, _label: &UserAgentLabel, _cascade: bool) -> Result<(), PortalError> {
            self.deleted.lock().await.push(identifier.to_string());
            Ok(())
        }
        async fn delete_all_entities_for_blueprint(&self, _blueprint: &str, _label: &UserAgentLabel) -> Result<String, PortalError> {
            unimplemented!()
        }
        async fn get_migration(&self, _id: &str) -> Result<crate::domain::ports::MigrationStatus, PortalError> {
            unimplemented!()
        }
        async fn get_blueprint(&self, _id: &str) -> Result<Value, PortalError> {
            unimplemented!()
        }
        async fn patch_blueprint(&self, _id: &str, _patch: &Value) -> Result<(), PortalError> {
            unimplemented!()
        }
        async fn patch_run(&self, _run_id: &uuid::Uuid, _patch: &Value) -> Result<(), PortalError> {
            unimplemented!()
        }
        async fn poll_action_runs(&self, _since: Option<chrono::DateTime<chrono::Utc>>, _limit: usize) -> Result<Vec<crate::domain::models::ActionRun>, PortalError> {
            unimplemented!()
        }
    }

    struct FlakyProcessor {
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl LiveEventProcessor for FlakyProcessor {
        fn should_process_event(&self, _event: &LiveEvent) -> bool {
            true
        }
        fn get_matching_kinds(&self, _event: &LiveEvent) -> Vec<String> {
            vec!["pull_request".to_string()]
        }
        async fn authenticate(&self, _payload: &Value, _headers: &Map<String, String>) -> bool {
            true
        }
        async fn validate_payload(&self, _payload: &Value) -> bool {
            true
        }
        async fn handle_event(&self, payload: &Value, _resource_config: &ResourceConfig) -> Result<LiveEventOutcome, EngineError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(EngineError::Config("transient".to_string()));
            }
            Ok(LiveEventOutcome { updated: vec![payload.clone()], deleted: vec![] })
        }
    }

    struct RejectingProcessor {
        authenticates: bool,
        validates: bool,
    }

    #[async_trait]
    impl LiveEventProcessor for RejectingProcessor {
        fn should_process_event(&self, _event: &LiveEvent) -> bool {
            true
        }
        fn get_matching_kinds(&self, _event: &LiveEvent) -> Vec<String> {
            vec!["pull_request".to_string()]
        }
        async fn authenticate(&self, _payload: &Value, _headers: &Map<String, String>) -> bool {
            self.authenticates
        }
        async fn validate_payload(&self, _payload: &Value) -> bool {
            self.validates
        }
        async fn handle_event(&self, _payload: &Value, _resource_config: &ResourceConfig) -> Result<LiveEventOutcome, EngineError> {
            unreachable!("handle_event must not run once authenticate/validate_payload has rejected the event")
        }
    }

    fn label() -> UserAgentLabel {
        UserAgentLabel {
            integration_type: "github".to_string(),
            integration_identifier: "github-prod".to_string(),
            version: "1.0.0".to_string(),
            feature: "prs".to_string(),
        }
    }

    fn default_app_config() -> PortAppConfig {
        PortAppConfig {
            resources: ResourceMapping::default(),
            delete_dependent_entities: false,
            create_missing_related_entities: true,
            enable_merge_entity: false,
            entity_deletion_threshold: None,
        }
    }

    fn runtime(processor: Arc<dyn LiveEventProcessor>, portal: Arc<FakePortal>) -> Arc<LiveEventRuntime> {
        let mut processors = BTreeMap::new();
        processors.insert("/webhooks/github".to_string(), vec![processor]);
        let mapping = ResourceMapping { resources: vec![resource_config()] };
        let entity_processor = Arc::new(EntityProcessor::new(Arc::new(MiniExpressionEngine)));
        LiveEventRuntime::new(processors, mapping, entity_processor, portal, default_app_config(), label())
    }

    #[tokio::test]
    async fn unknown_path_is_rejected() {
        let portal = Arc::new(FakePortal::default());
        let processor: Arc<dyn LiveEventProcessor> = Arc::new(FlakyProcessor { fail_times: AtomicUsize::new(0) });
        let rt = runtime(processor, portal);
        rt.start().await;
        let event = LiveEvent::new("/nope", "POST", Map::new(), json!({}));
        assert_eq!(rt.submit(event).await, IngestOutcome::UnknownPath);
    }

    #[tokio::test]
    async fn failed_authentication_is_rejected_before_enqueue() {
        let portal = Arc::new(FakePortal::default());
        let processor: Arc<dyn LiveEventProcessor> = Arc::new(RejectingProcessor { authenticates: false, validates: true });
        let rt = runtime(processor, Arc::clone(&portal));
        rt.start().await;
        let event = LiveEvent::new("/webhooks/github", "POST", Map::new(), json!({"id": "pr-1"}));
        assert_eq!(rt.submit(event).await, IngestOutcome::Unauthorized);
        rt.shutdown(Duration::from_secs(1)).await;
        assert!(portal.upserted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_validation_is_rejected_before_enqueue() {
        let portal = Arc::new(FakePortal::default());
        let processor: Arc<dyn LiveEventProcessor> = Arc::new(RejectingProcessor { authenticates: true, validates: false });
        let rt = runtime(processor, Arc::clone(&portal));
        rt.start().await;
        let event = LiveEvent::new("/webhooks/github", "POST", Map::new(), json!({"id": "pr-1"}));
        assert_eq!(rt.submit(event).await, IngestOutcome::InvalidPayload);
        rt.shutdown(Duration::from_secs(1)).await;
        assert!(portal.upserted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn successful_event_is_upserted_through_targeted_apply() {
        let portal = Arc::new(FakePortal::default());
        let processor: Arc<dyn LiveEventProcessor> = Arc::new(FlakyProcessor { fail_times: AtomicUsize::new(0) });
        let rt = runtime(processor, Arc::clone(&portal));
        rt.start().await;
        let event = LiveEvent::new("/webhooks/github", "POST", Map::new(), json!({"id": "pr-1", "title": "fix"}));
        assert_eq!(rt.submit(event).await, IngestOutcome::Enqueued);
        rt.shutdown(Duration::from_secs(1)).await;
        assert_eq!(portal.upserted.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn transient_handle_event_failure_is_retried_then_succeeds() {
        let portal = Arc::new(FakePortal::default());
        let processor: Arc<dyn LiveEventProcessor> = Arc::new(FlakyProcessor { fail_times: AtomicUsize::new(2) });
        let rt = runtime(processor, Arc::clone(&portal));
        rt.start().await;
        let event = LiveEvent::new("/webhooks/github", "POST", Map::new(), json!({"id": "pr-2", "title": "flaky"}));
        rt.submit(event).await;
        rt.shutdown(Duration::from_secs(5)).await;
        assert_eq!(portal.upserted.lock().await.len(), 1);
    }
}

//! Resync Orchestrator (§4.5): drives a full resync for a trigger type
//! across every configured resource, then reconciles per touched
//! blueprint.
//!
//! Upserts and the deletion diff are both issued from one reconciliation
//! pass per blueprint, run once all of a resync's batches have been
//! collected, rather than the source's interleaved per-batch upsert plus
//! trailing delete pass — see DESIGN.md for why this simplification still
//! satisfies the ordering and deletion-safety guarantees in §8.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::domain::errors::EngineError;
use crate::domain::models::{Event, EventType, PortAppConfig, ResourceConfig, TriggerType};
use crate::domain::ports::{IntegrationAdapter, PortalClient, UserAgentLabel};
use crate::services::entity_processor::{EntityProcessor, RecordClassification};
use crate::services::event_context::EventContext;
use crate::services::state_applier::StateApplier;

const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResyncState {
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct ResyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

struct BlueprintBucket {
    new_entities: Vec<crate::domain::models::Entity>,
    failed_selector_ids: Vec<String>,
}

pub struct ResyncOrchestrator {
    portal: Arc<dyn PortalClient>,
    adapter: Arc<dyn IntegrationAdapter>,
    processor: EntityProcessor,
    applier: StateApplier,
    label: UserAgentLabel,
    config_cache: tokio::sync::Mutex<Option<PortAppConfig>>,
    active: tokio::sync::Mutex<Option<Event>>,
    abort_grace: Duration,
}

impl ResyncOrchestrator {
    pub fn new(
        portal: Arc<dyn PortalClient>,
        adapter: Arc<dyn IntegrationAdapter>,
        engine: Arc<dyn crate::domain::ports::ExpressionEngine>,
        label: UserAgentLabel,
    ) -> Self {
        Self {
            applier: StateApplier::new(Arc::clone(&portal)),
            processor: EntityProcessor::new(engine),
            portal,
            adapter,
            label,
            config_cache: tokio::sync::Mutex::new(None),
            active: tokio::sync::Mutex::new(None),
            abort_grace: DEFAULT_ABORT_GRACE,
        }
    }

    /// Entry point for every [`crate::services::event_listener::EventListener`]
    /// variant. If a resync is already in flight, raises its abort signal,
    /// waits a bounded grace period, then starts the new one regardless of
    /// whether the previous one actually finished (§4.5 abort semantics).
    #[instrument(skip(self))]
    pub async fn trigger_resync(&self, trigger_type: TriggerType) -> ResyncReport {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            previous.abort();
            tokio::time::sleep(self.abort_grace).await;
        }
        self.run(trigger_type).await
    }

    async fn run(&self, trigger_type: TriggerType) -> ResyncReport {
        EventContext::with_event(EventType::Resync, trigger_type, None, |event| async move {
            *self.active.lock().await = Some(event.clone());
            info!(event_id = %event.event_id, ?trigger_type, "resync_start");

            let report = self.drive(false).await;

            *self.active.lock().await = None;
            let state = if !report.errors.is_empty() {
                ResyncState::Failed
            } else if event.is_aborted() {
                ResyncState::Aborted
            } else {
                ResyncState::Completed
            };
            info!(event_id = %event.event_id, ?state, created = report.created, updated = report.updated, deleted = report.deleted, failed = report.failed, "resync_complete");

            let state_payload = json!({
                "status": serde_json::to_value(state).unwrap_or(serde_json::Value::Null),
                "lastResyncStart": event.event_id,
                "errors": report.errors,
            });
            if let Err(err) = self.portal.update_integration_state(&self.label, &state_payload).await {
                warn!(error = %err, "failed to report resync state to portal");
            }

            report
        })
        .await
    }

    async fn drive(&self, bypass_cache: bool) -> ResyncReport {
        let mut report = ResyncReport::default();

        let app_config = match self.fetch_app_config(bypass_cache).await {
            Ok(config) => config,
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        };
        if let Err(err) = EventContext::set_app_config(&app_config) {
            report.errors.push(err.to_string());
            return report;
        }

        let mut buckets: BTreeMap<String, BlueprintBucket> = BTreeMap::new();

        'kinds: for resource_config in &app_config.resources.resources {
            if EventContext::is_aborted() {
                break 'kinds;
            }

            let mut stream = match self.adapter.open_stream(&resource_config.kind).await {
                Ok(stream) => stream,
                Err(err) => {
                    self.record_adapter_error(&mut report, &resource_config.kind, &err);
                    if err.is_fatal() {
                        break 'kinds;
                    }
                    continue 'kinds;
                }
            };

            loop {
                if EventContext::is_aborted() {
                    break 'kinds;
                }
                match stream.next_batch().await {
                    Ok(Some(batch)) => {
                        self.process_batch(&batch, resource_config, &mut buckets, &mut report);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        self.record_adapter_error(&mut report, &resource_config.kind, &err);
                        if err.is_fatal() {
                            break 'kinds;
                        }
                        break;
                    }
                }
            }
        }

        if EventContext::is_aborted() {
            // Per §4.5: partially-applied state is not rolled back, and the
            // subsequent resync reconciles instead of this one finishing.
            return report;
        }

        for (blueprint, bucket) in buckets {
            let apply_report = self
                .applier
                .apply(&blueprint, bucket.new_entities, &bucket.failed_selector_ids, &app_config, &self.label)
                .await;
            report.created += apply_report.created;
            report.updated += apply_report.updated;
            report.deleted += apply_report.deleted;
            report.failed += apply_report.failures.len();
            report.errors.extend(apply_report.failures.iter().map(ToString::to_string));
        }

        report
    }

    fn process_batch(
        &self,
        batch: &[serde_json::Value],
        resource_config: &ResourceConfig,
        buckets: &mut BTreeMap<String, BlueprintBucket>,
        report: &mut ResyncReport,
    ) {
        for record in batch {
            for processed in self.processor.process(record, resource_config) {
                match processed.classification {
                    RecordClassification::Misconfigured => {
                        report.failed += 1;
                    }
                    RecordClassification::FailedSelector => {
                        if let Some(entity) = processed.entity {
                            if let Some(id) = entity.id() {
                                buckets
                                    .entry(entity.blueprint.clone().unwrap_or_default())
                                    .or_insert_with(|| BlueprintBucket { new_entities: Vec::new(), failed_selector_ids: Vec::new() })
                                    .failed_selector_ids
                                    .push(id.to_string());
                            }
                        }
                    }
                    RecordClassification::PassedSelector => {
                        if let Some(entity) = processed.entity {
                            let blueprint = entity.blueprint.clone().unwrap_or_default();
                            buckets
                                .entry(blueprint)
                                .or_insert_with(|| BlueprintBucket { new_entities: Vec::new(), failed_selector_ids: Vec::new() })
                                .new_entities
                                .push(entity);
                        }
                    }
                }
            }
        }
    }

    fn record_adapter_error(&self, report: &mut ResyncReport, kind: &str, err: &EngineError) {
        warn!(error = %err, kind, "adapter stream error");
        report.errors.push(format!("{kind}: {err}"));
    }

    async fn fetch_app_config(&self, bypass_cache: bool) -> Result<PortAppConfig, EngineError> {
        let mut cache = self.config_cache.lock().await;
        if !bypass_cache {
            if let Some(config) = cache.as_ref() {
                return Ok(config.clone());
            }
        }
        let config = self.portal.get_app_config(&self.label).await.map_err(EngineError::from)?;
        *cache = Some(config.clone());
        Ok(config)
    }
}

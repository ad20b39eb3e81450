//! Event Listener (§4.6): the three mutually-exclusive ways a resync gets
//! triggered, all funneling into [`ResyncOrchestrator::trigger_resync`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::models::TriggerType;
use crate::domain::ports::{PortalClient, UserAgentLabel};
use crate::services::resync_orchestrator::ResyncOrchestrator;

/// Process exit codes per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Normal,
    CooperativeBusPartitionEmpty,
}

impl ExitReason {
    pub fn code(self) -> i32 {
        match self {
            ExitReason::Normal => 0,
            ExitReason::CooperativeBusPartitionEmpty => 2,
        }
    }
}

/// A message from the external message bus the `Cooperative` variant
/// subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMessage {
    ConfigChange,
    ResyncRequest,
}

/// The external message bus contract for the `Cooperative` variant.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Waits for the next message, or `None` if the bus is closed.
    async fn next_message(&self) -> Option<BusMessage>;
    /// Whether this process currently holds a non-empty partition
    /// assignment.
    fn has_partition_assignment(&self) -> bool;
}

#[derive(Debug, Clone)]
pub enum ListenerMode {
    Polling {
        interval: Duration,
        resync_interval: Duration,
    },
    Cooperative {
        partition_empty_timeout: Duration,
    },
    WebhookOnly,
}

impl Default for ListenerMode {
    fn default() -> Self {
        ListenerMode::Polling {
            interval: Duration::from_secs(60),
            resync_interval: Duration::from_secs(3600),
        }
    }
}

pub struct EventListener {
    mode: ListenerMode,
    orchestrator: Arc<ResyncOrchestrator>,
    portal: Arc<dyn PortalClient>,
    label: UserAgentLabel,
}

impl EventListener {
    pub fn new(mode: ListenerMode, orchestrator: Arc<ResyncOrchestrator>, portal: Arc<dyn PortalClient>, label: UserAgentLabel) -> Self {
        Self { mode, orchestrator, portal, label }
    }

    /// Runs the listener until it decides to stop (`Cooperative` on a
    /// sustained empty partition assignment) or `shutdown` resolves.
    pub async fn run(&self, bus: Option<Arc<dyn MessageBus>>, shutdown: impl std::future::Future<Output = ()>) -> ExitReason {
        tokio::pin!(shutdown);
        match self.mode.clone() {
            ListenerMode::Polling { interval, resync_interval } => {
                self.run_polling(interval, resync_interval, shutdown).await
            }
            ListenerMode::Cooperative { partition_empty_timeout } => {
                let bus = bus.expect("Cooperative mode requires a message bus");
                self.run_cooperative(bus, partition_empty_timeout, shutdown).await
            }
            ListenerMode::WebhookOnly => {
                // Never triggers a resync of its own; inbound events are
                // forwarded straight to the Live Event Processor Runtime by
                // the HTTP surface, not through this loop.
                shutdown.await;
                ExitReason::Normal
            }
        }
    }

    async fn run_polling(&self, interval: Duration, resync_interval: Duration, mut shutdown: std::pin::Pin<&mut impl std::future::Future<Output = ()>>) -> ExitReason {
        let mut config_ticker = tokio::time::interval(interval);
        let mut resync_ticker = tokio::time::interval(resync_interval);
        let mut last_fingerprint: Option<String> = None;

        loop {
            tokio::select! {
                _ = config_ticker.tick() => {
                    self.poll_config_change(&mut last_fingerprint).await;
                }
                _ = resync_ticker.tick() => {
                    info!("periodic resync_interval elapsed");
                    self.orchestrator.trigger_resync(TriggerType::Machine).await;
                }
                () = &mut shutdown => return ExitReason::Normal,
            }
        }
    }

    /// One polling tick: fetch the app config, compare its fingerprint to
    /// the last known one, and trigger a resync if it changed. Exposed
    /// separately from the timer loop so it is unit-testable without real
    /// timers.
    async fn poll_config_change(&self, last_fingerprint: &mut Option<String>) -> bool {
        let config = match self.portal.get_app_config(&self.label).await {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "polling failed to fetch app config");
                return false;
            }
        };
        let fingerprint = config_fingerprint(&config);
        let changed = last_fingerprint.as_deref() != Some(fingerprint.as_str());
        *last_fingerprint = Some(fingerprint);
        if changed {
            info!("app config fingerprint changed; triggering resync");
            self.orchestrator.trigger_resync(TriggerType::Machine).await;
        }
        changed
    }

    async fn run_cooperative(&self, bus: Arc<dyn MessageBus>, partition_empty_timeout: Duration, mut shutdown: std::pin::Pin<&mut impl std::future::Future<Output = ()>>) -> ExitReason {
        loop {
            if !bus.has_partition_assignment() {
                let waited_out = tokio::select! {
                    () = tokio::time::sleep(partition_empty_timeout) => true,
                    () = &mut shutdown => return ExitReason::Normal,
                };
                if waited_out && !bus.has_partition_assignment() {
                    warn!("partition assignment empty past the grace window; exiting for a restart");
                    return ExitReason::CooperativeBusPartitionEmpty;
                }
            }

            tokio::select! {
                message = bus.next_message() => match message {
                    Some(_) => {
                        self.orchestrator.trigger_resync(TriggerType::Machine).await;
                    }
                    None => return ExitReason::Normal,
                },
                () = &mut shutdown => return ExitReason::Normal,
            }
        }
    }
}

fn config_fingerprint(config: &crate::domain::models::PortAppConfig) -> String {
    let serialized = serde_json::to_string(config).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ResourceMapping;

    fn config(threshold: Option<f64>) -> crate::domain::models::PortAppConfig {
        crate::domain::models::PortAppConfig {
            resources: ResourceMapping::default(),
            delete_dependent_entities: false,
            create_missing_related_entities: false,
            enable_merge_entity: false,
            entity_deletion_threshold: threshold,
        }
    }

    #[test]
    fn fingerprint_is_stable_for_identical_config() {
        assert_eq!(config_fingerprint(&config(Some(0.5))), config_fingerprint(&config(Some(0.5))));
    }

    #[test]
    fn fingerprint_changes_when_config_changes() {
        assert_ne!(config_fingerprint(&config(Some(0.5))), config_fingerprint(&config(Some(0.9))));
    }

    #[test]
    fn exit_reason_codes_match_the_specification() {
        assert_eq!(ExitReason::Normal.code(), 0);
        assert_eq!(ExitReason::CooperativeBusPartitionEmpty.code(), 2);
    }
}

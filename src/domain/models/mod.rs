pub mod action_run;
pub mod app_config;
pub mod entity;
pub mod event;
pub mod integration_config;
pub mod live_event;
pub mod resource_config;

pub use action_run::{ActionRun, ActionStatus};
pub use app_config::PortAppConfig;
pub use entity::{Entity, RelationTarget, SearchQuery};
pub use event::{Event, EventType, TriggerType};
pub use integration_config::{
    ConfigOptionSpec, ConfigValueType, FeatureSpec, IntegrationConfig, IntegrationConfigError,
    IntegrationSpec,
};
pub use live_event::{LiveEvent, LiveEventOutcome};
pub use resource_config::{EntityMapping, PortConfig, ResourceConfig, ResourceMapping};

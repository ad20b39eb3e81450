pub mod adapter;
pub mod expression;
pub mod portal_client;

pub use adapter::{ActionExecutor, BatchStream, IntegrationAdapter, LiveEventProcessor};
pub use expression::{Bindings, CompiledExpr, ExpressionEngine};
pub use portal_client::{MigrationStatus, PortalClient, UserAgentLabel};

pub mod loader;

pub use loader::{
    ActionManagerSettings, ConfigError, ConfigLoader, HttpConfig, LogFormat, LoggingConfig,
    PortalConfig, ResyncConfig, RuntimeConfig,
};

//! Adapters implementing the domain's ports: configuration loading,
//! logging setup, and the Portal Client.

pub mod config;
pub mod http;
pub mod logging;
pub mod portal;

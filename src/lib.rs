//! Resync and reconciliation engine for developer-portal integrations.
//!
//! Layered as domain (pure types and port traits) → engine (reference
//! expression evaluator) → services (orchestration) → infrastructure
//! (adapters: config, logging, the Portal Client, the HTTP surface).

pub mod domain;
pub mod engine;
pub mod infrastructure;
pub mod runtime;
pub mod services;

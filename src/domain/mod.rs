//! Domain layer: entities, ports, and the error taxonomy. Pure data and
//! trait boundaries — no I/O, no tokio.

pub mod errors;
pub mod models;
pub mod ports;

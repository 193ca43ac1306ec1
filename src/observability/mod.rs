//! # Observability
//!
//! Structured logging for the harness and its services.

pub mod logging;

pub use logging::{init_logging, log_port_map};

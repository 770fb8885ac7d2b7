//! # Observability
//!
//! Structured logging for the node. Every crate logs through `tracing`
//! with structured fields (`peer`, `request_id`, `url`); this module installs
//! the subscriber once at startup.

mod logging;

pub use logging::{default_directives, init_logging, LogFormat};

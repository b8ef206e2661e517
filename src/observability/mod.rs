//! Observability for the session supervisor
//!
//! Structured logging through `tracing` and per-supervisor counters.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{attempt_span, pairing_span};

//! dandidav Telemetry - Logging Setup
//!
//! Structured logging through `tracing`. Request spans come from
//! `tower-http`'s `TraceLayer` on the router.

pub mod tracer;

pub use tracer::{init_tracing, TelemetryConfig, DEFAULT_LOG_FILTER};

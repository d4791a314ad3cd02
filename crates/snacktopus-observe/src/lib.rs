//! Observability for Operation Snacktopus: subscriber setup and shared span
//! attribute names.

pub mod telemetry;
pub mod tracing_setup;

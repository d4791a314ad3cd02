//! Infrastructure layer for Operation Snacktopus.
//!
//! Contains implementations of the port traits defined in `snacktopus-core`:
//! SQLite storage for the local durable store, the Dapr sidecar HTTP client
//! and its state/pub-sub/secret adapters, environment secrets, settings
//! loading, and sidecar port discovery.

pub mod config;
pub mod dapr;
pub mod discovery;
pub mod secret;
pub mod sqlite;

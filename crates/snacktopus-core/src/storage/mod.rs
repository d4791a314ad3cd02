//! Storage abstractions for Snacktopus.
//!
//! Defines the key-value state store trait. Implementations (sidecar-backed
//! and SQLite) live in snacktopus-infra.

pub mod state_store;

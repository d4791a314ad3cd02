//! Shared domain types for Operation Snacktopus.
//!
//! Workflow instances and their durable history, retry policies, the human
//! approval payload, sidecar metadata, settings, and the error enums shared by
//! every layer.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod error;
pub mod event;
pub mod sidecar;
pub mod workflow;

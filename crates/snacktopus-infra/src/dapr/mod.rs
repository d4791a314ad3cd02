//! Dapr sidecar integration.
//!
//! [`client::SidecarClient`] speaks the sidecar's HTTP API. The adapters wrap
//! it behind the port traits of `snacktopus-core` so workflows and tools do
//! not depend on the sidecar directly.

pub mod client;
pub mod pubsub;
pub mod secret;
pub mod state;

pub use client::{SidecarClient, SidecarError};
pub use pubsub::DaprPublisher;
pub use secret::DaprSecretProvider;
pub use state::DaprStateStore;

#[cfg(test)]
pub(crate) mod fake;

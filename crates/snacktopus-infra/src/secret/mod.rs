//! Secret provider implementations.
//!
//! - `env`: Environment variable provider (read-only, highest priority)
//! - `chain`: Secret chain builder wiring the providers together
//!
//! The sidecar-backed provider lives in [`crate::dapr::secret`].

pub mod chain;
pub mod env;

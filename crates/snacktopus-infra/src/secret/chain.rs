//! Secret chain builder -- wires concrete providers in priority order.
//!
//! The resulting chain is passed to `SecretService` in `snacktopus-core` via
//! the `DynSecretProvider` abstraction.
//!
//! Default chain order: `[EnvSecretProvider, DaprSecretProvider]`

use std::sync::Arc;

use snacktopus_core::repository::secret::DynSecretProvider;

use crate::dapr::secret::DaprSecretProvider;
use crate::secret::env::EnvSecretProvider;

/// Build the secret resolution chain (first match wins).
///
/// 1. Environment variables (if `include_env` is true)
/// 2. Sidecar secret store (if `sidecar` is Some)
pub fn build_secret_chain(sidecar: Option<DaprSecretProvider>, include_env: bool) -> Vec<DynSecretProvider> {
    let mut chain: Vec<DynSecretProvider> = Vec::new();

    if include_env {
        chain.push(Arc::new(EnvSecretProvider::new()));
    }

    if let Some(provider) = sidecar {
        chain.push(Arc::new(provider));
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dapr::SidecarClient;

    #[test]
    fn test_chain_order() {
        let sidecar = DaprSecretProvider::new(Arc::new(SidecarClient::for_port(3500)), "localsecret");
        let chain = build_secret_chain(Some(sidecar), true);
        let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["env", "dapr"]);
    }

    #[test]
    fn test_chain_without_env() {
        let chain = build_secret_chain(None, false);
        assert!(chain.is_empty());
    }
}

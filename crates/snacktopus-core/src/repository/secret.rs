//! Secret provider trait definition.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use snacktopus_types::error::RepositoryError;

/// A named secret: a map of fields, e.g. `ollama -> {"apiKey": "..."}`.
pub type SecretValues = BTreeMap<String, String>;

/// Trait for secret backends (sidecar secret store, environment).
///
/// The `SecretService` chains multiple providers in priority order.
pub trait SecretProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Look up a secret by name. Returns None if this provider does not have it.
    fn get(
        &self,
        secret_name: &str,
    ) -> impl Future<Output = Result<Option<SecretValues>, RepositoryError>> + Send;
}

/// Object-safe version of [`SecretProvider`] with boxed futures.
pub trait SecretProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn get_boxed<'a>(
        &'a self,
        secret_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SecretValues>, RepositoryError>> + Send + 'a>>;
}

impl<T: SecretProvider> SecretProviderDyn for T {
    fn name(&self) -> &str {
        SecretProvider::name(self)
    }

    fn get_boxed<'a>(
        &'a self,
        secret_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SecretValues>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.get(secret_name))
    }
}

pub type DynSecretProvider = Arc<dyn SecretProviderDyn>;

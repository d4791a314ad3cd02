//! Secret resolution service.
//!
//! SecretService resolves secrets through a chain of providers in priority
//! order. The default chain is environment first, then the sidecar's secret
//! store.
//!
//! This service depends only on the `DynSecretProvider` abstraction -- never
//! on concrete infra implementations.

use snacktopus_types::error::RepositoryError;

use crate::repository::secret::{DynSecretProvider, SecretValues};

/// Service for resolving secrets across multiple backends.
///
/// Providers are ordered by precedence (first match wins).
pub struct SecretService {
    providers: Vec<DynSecretProvider>,
}

impl SecretService {
    pub fn new(providers: Vec<DynSecretProvider>) -> Self {
        Self { providers }
    }

    /// Resolve a secret by iterating providers in priority order.
    ///
    /// A provider that errors (e.g. the sidecar is down) is skipped with a
    /// warning; the last error is returned only if no provider had the secret
    /// and at least one failed.
    pub async fn get_secret(&self, secret_name: &str) -> Result<Option<SecretValues>, RepositoryError> {
        let mut last_error = None;

        for provider in &self.providers {
            match provider.get_boxed(secret_name).await {
                Ok(Some(values)) => {
                    tracing::debug!(provider = provider.name(), secret_name, "secret resolved");
                    return Ok(Some(values));
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), secret_name, error = %e, "secret provider failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Resolve a single field of a secret.
    pub async fn get_field(&self, secret_name: &str, field: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .get_secret(secret_name)
            .await?
            .and_then(|mut values| values.remove(field)))
    }

    /// Mask a secret value, showing only the last 4 characters.
    ///
    /// - "sk-abcdefghijklmnop" -> "****mnop"
    /// - "abc" -> "****" (too short to show any chars)
    pub fn mask_secret(value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= 4 {
            "****".to_string()
        } else {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("****{tail}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::secret::SecretProvider;
    use std::sync::Arc;

    struct MockProvider {
        name: &'static str,
        values: Option<SecretValues>,
        fail: bool,
    }

    impl MockProvider {
        fn with(name: &'static str, field: &str, value: &str) -> Self {
            let mut values = SecretValues::new();
            values.insert(field.to_string(), value.to_string());
            Self {
                name,
                values: Some(values),
                fail: false,
            }
        }

        fn empty(name: &'static str) -> Self {
            Self {
                name,
                values: None,
                fail: false,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                values: None,
                fail: true,
            }
        }
    }

    impl SecretProvider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn get(&self, _secret_name: &str) -> Result<Option<SecretValues>, RepositoryError> {
            if self.fail {
                return Err(RepositoryError::Connection);
            }
            Ok(self.values.clone())
        }
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let service = SecretService::new(vec![
            Arc::new(MockProvider::with("env", "apiKey", "env-value")),
            Arc::new(MockProvider::with("sidecar", "apiKey", "sidecar-value")),
        ]);

        let value = service.get_field("ollama", "apiKey").await.unwrap();
        assert_eq!(value, Some("env-value".to_string()));
    }

    #[tokio::test]
    async fn test_falls_through_empty_and_failing_providers() {
        let service = SecretService::new(vec![
            Arc::new(MockProvider::empty("env")),
            Arc::new(MockProvider::failing("broken")),
            Arc::new(MockProvider::with("sidecar", "apiKey", "sidecar-value")),
        ]);

        let value = service.get_field("ollama", "apiKey").await.unwrap();
        assert_eq!(value, Some("sidecar-value".to_string()));
    }

    #[tokio::test]
    async fn test_error_surfaces_when_nothing_found() {
        let service = SecretService::new(vec![
            Arc::new(MockProvider::empty("env")),
            Arc::new(MockProvider::failing("broken")),
        ]);

        assert!(service.get_secret("ollama").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_none() {
        let service = SecretService::new(vec![Arc::new(MockProvider::empty("env"))]);
        assert!(service.get_secret("ollama").await.unwrap().is_none());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(SecretService::mask_secret("sk-abcdefghijklmnop"), "****mnop");
        assert_eq!(SecretService::mask_secret("abc"), "****");
    }
}

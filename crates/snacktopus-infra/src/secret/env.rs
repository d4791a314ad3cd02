//! Environment variable secret provider.
//!
//! Secret `name` is read from `SNACKTOPUS_SECRET_{NAME}` where `NAME` is the
//! upper-cased name with non-alphanumerics replaced by `_`. The value is
//! either a JSON object of string fields or a plain string, which becomes the
//! single field `name`.

use snacktopus_core::repository::secret::{SecretProvider, SecretValues};
use snacktopus_types::error::RepositoryError;

pub const ENV_PREFIX: &str = "SNACKTOPUS_SECRET_";

pub struct EnvSecretProvider;

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variable holding secret `name`.
pub fn env_var_name(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}{suffix}")
}

fn parse_secret(name: &str, raw: &str) -> SecretValues {
    if let Ok(fields) = serde_json::from_str::<SecretValues>(raw.trim()) {
        return fields;
    }
    SecretValues::from([(name.to_string(), raw.to_string())])
}

impl SecretProvider for EnvSecretProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get(&self, secret_name: &str) -> Result<Option<SecretValues>, RepositoryError> {
        match std::env::var(env_var_name(secret_name)) {
            Ok(raw) => Ok(Some(parse_secret(secret_name, &raw))),
            // Non-unicode values are treated as absent
            Err(std::env::VarError::NotPresent) | Err(std::env::VarError::NotUnicode(_)) => Ok(None),
        }
    }
}

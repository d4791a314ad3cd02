//! Settings loader for every Snacktopus service.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults ([`Settings::default`])
//! 2. `snacktopus.toml` (path from the caller, `SNACKTOPUS_CONFIG`, or the
//!    working directory); a missing or malformed file falls back to defaults
//! 3. `.env` in the working directory (never overrides variables already set)
//! 4. the process environment, keyed by upper-cased field name
//!    (`DAPR_HTTP_PORT`, `OLLAMA_MODEL`, ...)
//!
//! Unrecognized `SNACKTOPUS_*` variables are kept in `Settings::extra`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use snacktopus_types::config::Settings;
use snacktopus_types::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "snacktopus.toml";

/// Variables with this prefix that are not settings in their own right.
const RESERVED_PREFIXED: &[&str] = &["SNACKTOPUS_CONFIG", "SNACKTOPUS_DATA_DIR", "SNACKTOPUS_SECRET_"];

/// Load settings from every layer.
pub async fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let mut settings = load_file_settings(&config_path).await;

    match dotenvy::dotenv() {
        Ok(env_path) => tracing::debug!("Loaded environment from {}", env_path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!("Failed to load .env: {err}"),
    }

    apply_env_overrides(&mut settings, std::env::vars())?;
    Ok(settings)
}

fn default_config_path() -> PathBuf {
    std::env::var("SNACKTOPUS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE_NAME))
}

/// Read the TOML layer, falling back to defaults on any failure.
pub async fn load_file_settings(config_path: &Path) -> Settings {
    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", config_path.display());
            return Settings::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return Settings::default();
        }
    };

    match toml::from_str::<Settings>(&content) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            Settings::default()
        }
    }
}

/// Apply environment overrides from `vars` onto `settings`.
pub fn apply_env_overrides<I>(settings: &mut Settings, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        match key.as_str() {
            "DAPR_HTTP_PORT" => settings.dapr_http_port = parse_value(&key, &value)?,
            "DAPR_GRPC_PORT" => settings.dapr_grpc_port = parse_value(&key, &value)?,
            "REDIS_URL" => settings.redis_url = value,
            "OLLAMA_ENDPOINT" => settings.ollama_endpoint = value,
            "OLLAMA_MODEL" => settings.ollama_model = value,
            "STATE_STORE" => settings.state_store = value,
            "PUBSUB" => settings.pubsub = value,
            "SECRET_STORE" => settings.secret_store = value,
            "WORKFLOW_COMPONENT" => settings.workflow_component = value,
            "WORKFLOW_API_VERSION" => settings.workflow_api_version = value,
            "WORKFLOW_APP_ID" => settings.workflow_app_id = value,
            "AGENT_HTTP_PORT" => settings.agent_http_port = parse_value(&key, &value)?,
            "WORKFLOW_HTTP_PORT" => settings.workflow_http_port = parse_value(&key, &value)?,
            "DATABASE_URL" => settings.database_url = Some(value),
            "APPROVAL_TIMEOUT_SECS" => settings.approval_timeout_secs = parse_value(&key, &value)?,
            other => {
                if RESERVED_PREFIXED.iter().any(|p| other.starts_with(p)) {
                    continue;
                }
                if let Some(name) = other.strip_prefix("SNACKTOPUS_") {
                    settings
                        .extra
                        .insert(name.to_ascii_lowercase(), serde_json::Value::String(value));
                }
            }
        }
    }
    Ok(())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn load_file_settings_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let settings = load_file_settings(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn load_file_settings_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
dapr_http_port = 3601
pubsub = "snack-events"
approval_timeout_secs = 30
"#,
        )
        .await
        .unwrap();

        let settings = load_file_settings(&path).await;
        assert_eq!(settings.dapr_http_port, 3601);
        assert_eq!(settings.pubsub, "snack-events");
        assert_eq!(settings.approval_timeout_secs, 30);
        assert_eq!(settings.state_store, "statestore");
    }

    #[tokio::test]
    async fn load_file_settings_malformed_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "dapr_http_port = \"not a port\"\n[[[")
            .await
            .unwrap();

        let settings = load_file_settings(&path).await;
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn env_overrides_known_fields() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            vars(&[
                ("DAPR_HTTP_PORT", "3602"),
                ("OLLAMA_MODEL", "llama3:8b"),
                ("DATABASE_URL", "sqlite://snack.db"),
                ("AGENT_HTTP_PORT", " 9000 "),
                ("WORKFLOW_APP_ID", "snack-host"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.dapr_http_port, 3602);
        assert_eq!(settings.ollama_model, "llama3:8b");
        assert_eq!(settings.database_url.as_deref(), Some("sqlite://snack.db"));
        assert_eq!(settings.agent_http_port, 9000);
        assert_eq!(settings.workflow_app_id, "snack-host");
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn env_override_rejects_bad_port() {
        let mut settings = Settings::default();
        let err = apply_env_overrides(&mut settings, vars(&[("DAPR_HTTP_PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DAPR_HTTP_PORT"));
    }

    #[test]
    fn unknown_prefixed_vars_land_in_extra() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            vars(&[
                ("SNACKTOPUS_TEAM", "snacks"),
                ("SNACKTOPUS_SECRET_OLLAMA", "hidden"),
                ("SNACKTOPUS_DATA_DIR", "/tmp/x"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.extra.len(), 1);
        assert_eq!(settings.extra.get("team"), Some(&serde_json::json!("snacks")));
    }

    #[tokio::test]
    async fn load_settings_reads_explicit_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        tokio::fs::write(&path, "workflow_component = \"snacky\"\n")
            .await
            .unwrap();

        let settings = load_settings(Some(&path)).await.unwrap();
        assert_eq!(settings.workflow_component, "snacky");
    }
}

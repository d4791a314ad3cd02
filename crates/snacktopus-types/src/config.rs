//! Settings shared by every Snacktopus service.
//!
//! `Settings` is layered by `snacktopus-infra::config`: built-in defaults,
//! then an optional `snacktopus.toml`, then `.env`, then the process
//! environment. Every field has a default so an empty file is valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP port of the local sidecar.
    #[serde(default = "default_dapr_http_port")]
    pub dapr_http_port: u16,

    /// gRPC port of the local sidecar (reported only; the HTTP API is used).
    #[serde(default = "default_dapr_grpc_port")]
    pub dapr_grpc_port: u16,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_ollama_endpoint")]
    pub ollama_endpoint: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    /// State store component name.
    #[serde(default = "default_state_store")]
    pub state_store: String,

    /// Pub/sub component name.
    #[serde(default = "default_pubsub")]
    pub pubsub: String,

    /// Secret store component name.
    #[serde(default = "default_secret_store")]
    pub secret_store: String,

    /// Workflow component name used in workflow API paths.
    #[serde(default = "default_workflow_component")]
    pub workflow_component: String,

    /// Workflow API version segment (`v1.0-beta1` or `v1.0-alpha1`).
    #[serde(default = "default_workflow_api_version")]
    pub workflow_api_version: String,

    /// App id of the workflow host. Workflow calls made through a sidecar
    /// are routed to it by service invocation.
    #[serde(default = "default_workflow_app_id")]
    pub workflow_app_id: String,

    /// Port the agent shell listens on.
    #[serde(default = "default_agent_http_port")]
    pub agent_http_port: u16,

    /// Port the workflow host's HTTP API listens on.
    #[serde(default = "default_workflow_http_port")]
    pub workflow_http_port: u16,

    /// SQLite URL for the workflow host's durable store (None = data dir default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// How long the snack saga waits for a human verdict.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// Unrecognized keys are kept rather than rejected.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_dapr_http_port() -> u16 {
    3500
}

fn default_dapr_grpc_port() -> u16 {
    50001
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "deepseek-r1:8b".to_string()
}

fn default_state_store() -> String {
    "statestore".to_string()
}

fn default_pubsub() -> String {
    "events".to_string()
}

fn default_secret_store() -> String {
    "localsecret".to_string()
}

fn default_workflow_component() -> String {
    "dapr".to_string()
}

fn default_workflow_api_version() -> String {
    "v1.0-beta1".to_string()
}

fn default_workflow_app_id() -> String {
    "workflow-host".to_string()
}

fn default_agent_http_port() -> u16 {
    8000
}

fn default_workflow_http_port() -> u16 {
    8001
}

fn default_approval_timeout_secs() -> u64 {
    3600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dapr_http_port: default_dapr_http_port(),
            dapr_grpc_port: default_dapr_grpc_port(),
            redis_url: default_redis_url(),
            ollama_endpoint: default_ollama_endpoint(),
            ollama_model: default_ollama_model(),
            state_store: default_state_store(),
            pubsub: default_pubsub(),
            secret_store: default_secret_store(),
            workflow_component: default_workflow_component(),
            workflow_api_version: default_workflow_api_version(),
            workflow_app_id: default_workflow_app_id(),
            agent_http_port: default_agent_http_port(),
            workflow_http_port: default_workflow_http_port(),
            database_url: None,
            approval_timeout_secs: default_approval_timeout_secs(),
            extra: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Base URL of the local sidecar's HTTP API.
    pub fn sidecar_url(&self) -> String {
        format!("http://localhost:{}", self.dapr_http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.dapr_http_port, 3500);
        assert_eq!(settings.dapr_grpc_port, 50001);
        assert_eq!(settings.redis_url, "redis://localhost:6379/0");
        assert_eq!(settings.ollama_endpoint, "http://localhost:11434");
        assert_eq!(settings.ollama_model, "deepseek-r1:8b");
        assert_eq!(settings.state_store, "statestore");
        assert_eq!(settings.pubsub, "events");
        assert_eq!(settings.workflow_api_version, "v1.0-beta1");
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn test_settings_deserialize_empty_toml() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_deserialize_with_values_and_extra() {
        let toml_str = r#"
dapr_http_port = 3601
ollama_model = "llama3:8b"
team = "snacks"
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.dapr_http_port, 3601);
        assert_eq!(settings.ollama_model, "llama3:8b");
        assert_eq!(settings.extra.get("team"), Some(&serde_json::json!("snacks")));
    }

    #[test]
    fn test_sidecar_url() {
        let settings = Settings {
            dapr_http_port: 3601,
            ..Settings::default()
        };
        assert_eq!(settings.sidecar_url(), "http://localhost:3601");
    }
}

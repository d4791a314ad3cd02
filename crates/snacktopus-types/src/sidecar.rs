//! Wire shapes of the sidecar's HTTP API and `dapr list` output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::workflow::{WorkflowInstance, WorkflowRuntimeStatus};

/// Property keys the sidecar uses to report workflow payloads.
pub const PROPERTY_INPUT: &str = "dapr.workflow.input";
pub const PROPERTY_OUTPUT: &str = "dapr.workflow.output";
pub const PROPERTY_CUSTOM_STATUS: &str = "dapr.workflow.custom_status";

/// Response of `GET /v1.0/metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub components: Vec<ComponentMetadata>,
}

impl SidecarMetadata {
    /// Whether a component with `name` is loaded.
    pub fn has_component(&self, name: &str) -> bool {
        self.components.iter().any(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub component_type: String,
    #[serde(default)]
    pub version: String,
}

/// One entry of a state-store bulk save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: serde_json::Value,
}

/// One running app as reported by `dapr list -o json`.
///
/// Older CLIs spell the id `appID`; the port may come back as a number or a
/// digit string. Sidecars started without an app (or via `httpEndpoint`) can
/// omit fields, so everything is optional here and filtered by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstance {
    #[serde(rename = "appId", alias = "appID", default)]
    pub app_id: Option<String>,
    #[serde(rename = "httpPort", default, deserialize_with = "port_from_number_or_string")]
    pub http_port: Option<u16>,
    #[serde(rename = "httpEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
}

impl AppInstance {
    /// Sidecar HTTP port, taken from `httpEndpoint` when `httpPort` is absent.
    pub fn sidecar_port(&self) -> Option<u16> {
        self.http_port.or_else(|| {
            let endpoint = self.http_endpoint.as_deref()?.trim().trim_end_matches('/');
            endpoint.rsplit(':').next()?.parse().ok()
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow API
// ---------------------------------------------------------------------------

/// Body returned by `POST .../workflows/{component}/{name}/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStartResponse {
    #[serde(rename = "instanceID")]
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFailureDetails {
    pub error_type: String,
    pub message: String,
}

/// Body returned by `GET .../workflows/{component}/{instance_id}`.
///
/// Payloads are JSON-serialized strings. Sidecars report them under
/// `properties`; the workflow host also sets the top-level `input`/`output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Kept as text so unknown statuses from newer sidecars still parse.
    pub runtime_status: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<WorkflowFailureDetails>,
}

impl WorkflowState {
    pub fn from_instance(instance: &WorkflowInstance) -> Self {
        let input = instance.input.as_ref().map(|v| v.to_string());
        let output = instance.output.as_ref().map(|v| v.to_string());

        let mut properties = BTreeMap::new();
        if let Some(input) = &input {
            properties.insert(PROPERTY_INPUT.to_string(), input.clone());
        }
        if let Some(output) = &output {
            properties.insert(PROPERTY_OUTPUT.to_string(), output.clone());
        }
        if let Some(custom) = &instance.custom_status {
            properties.insert(PROPERTY_CUSTOM_STATUS.to_string(), custom.clone());
        }

        Self {
            instance_id: instance.instance_id.clone(),
            workflow_name: instance.workflow_name.clone(),
            created_at: Some(instance.created_at),
            last_updated_at: Some(instance.last_updated_at),
            runtime_status: instance.status.as_str().to_string(),
            properties,
            input,
            output,
            failure_details: instance.failure.as_ref().map(|f| WorkflowFailureDetails {
                error_type: f.error_type.clone(),
                message: f.message.clone(),
            }),
        }
    }

    /// Parsed runtime status, if it is one this crate knows.
    pub fn status(&self) -> Option<WorkflowRuntimeStatus> {
        self.runtime_status.parse().ok()
    }

    /// Serialized output from the top-level field or the sidecar property.
    pub fn output_text(&self) -> Option<&str> {
        self.output
            .as_deref()
            .or_else(|| self.properties.get(PROPERTY_OUTPUT).map(String::as_str))
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u16>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_reports_components() {
        let json = r#"{"id":"agent-shell","components":[{"name":"statestore","type":"state.redis","version":"v1"}]}"#;
        let meta: SidecarMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.id, "agent-shell");
        assert!(meta.has_component("statestore"));
        assert!(!meta.has_component("events"));
    }

    #[test]
    fn app_instance_accepts_both_spellings() {
        let a: AppInstance = serde_json::from_str(r#"{"appId":"agent-shell","httpPort":3500}"#).unwrap();
        let b: AppInstance = serde_json::from_str(r#"{"appID":"workflow-host","httpPort":"3601"}"#).unwrap();
        assert_eq!(a.http_port, Some(3500));
        assert_eq!(b.app_id.as_deref(), Some("workflow-host"));
        assert_eq!(b.http_port, Some(3601));
    }

    #[test]
    fn app_instance_tolerates_missing_fields() {
        let bare: AppInstance = serde_json::from_str(r#"{"httpPort":3601}"#).unwrap();
        assert!(bare.app_id.is_none());
        assert_eq!(bare.sidecar_port(), Some(3601));

        let endpoint: AppInstance =
            serde_json::from_str(r#"{"appId":"remote","httpEndpoint":"http://localhost:3602/"}"#).unwrap();
        assert_eq!(endpoint.sidecar_port(), Some(3602));

        let neither: AppInstance = serde_json::from_str(r#"{"appId":"quiet","httpEndpoint":"localhost"}"#).unwrap();
        assert_eq!(neither.sidecar_port(), None);
    }

    #[test]
    fn workflow_state_serializes_payloads_as_strings() {
        let mut instance = WorkflowInstance::new("smoke-wf-1", "hello_snacktopus", None);
        instance.status = WorkflowRuntimeStatus::Completed;
        instance.output = Some(serde_json::json!("Workflow says hi to Snacktopus!"));

        let state = WorkflowState::from_instance(&instance);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["instanceID"], "smoke-wf-1");
        assert_eq!(json["runtimeStatus"], "COMPLETED");
        assert_eq!(json["output"], "\"Workflow says hi to Snacktopus!\"");
        assert_eq!(
            json["properties"][PROPERTY_OUTPUT],
            "\"Workflow says hi to Snacktopus!\""
        );
        assert!(json.get("input").is_none());
        assert!(json.get("failureDetails").is_none());
    }

    #[test]
    fn workflow_state_reads_sidecar_properties() {
        let json = r#"{
            "instanceID": "smoke-wf-1",
            "workflowName": "hello_snacktopus",
            "runtimeStatus": "COMPLETED",
            "properties": {"dapr.workflow.output": "\"Workflow says hi\""}
        }"#;
        let state: WorkflowState = serde_json::from_str(json).unwrap();
        assert_eq!(state.status(), Some(WorkflowRuntimeStatus::Completed));
        assert_eq!(state.output_text(), Some("\"Workflow says hi\""));

        let odd: WorkflowState =
            serde_json::from_str(r#"{"instanceID":"x","runtimeStatus":"CONTINUED_AS_NEW"}"#).unwrap();
        assert_eq!(odd.status(), None);
        assert_eq!(odd.output_text(), None);
    }

    #[test]
    fn app_instance_tolerates_bad_port() {
        let a: AppInstance = serde_json::from_str(r#"{"appId":"x","httpPort":"n/a"}"#).unwrap();
        assert_eq!(a.http_port, None);
        let b: AppInstance = serde_json::from_str(r#"{"appId":"x"}"#).unwrap();
        assert_eq!(b.http_port, None);
    }
}

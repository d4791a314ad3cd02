//! HTTP client for the local Dapr sidecar.
//!
//! Covers the building blocks Snacktopus uses: metadata and health, state,
//! pub/sub, secrets, and the workflow management API. Every call carries a
//! short timeout; the sidecar is always on localhost.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde_json::Value;
use snacktopus_types::error::RepositoryError;
use snacktopus_types::sidecar::{SidecarMetadata, StateEntry, WorkflowStartResponse, WorkflowState};
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_WORKFLOW_API_VERSION: &str = "v1.0-beta1";
pub const DEFAULT_WORKFLOW_COMPONENT: &str = "dapr";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("sidecar request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sidecar returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid sidecar response: {0}")]
    Decode(String),
}

impl SidecarError {
    /// True when nothing is listening on the sidecar port.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connect())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<SidecarError> for RepositoryError {
    fn from(err: SidecarError) -> Self {
        if err.is_connection_refused() {
            RepositoryError::Connection
        } else if err.status() == Some(404) {
            RepositoryError::NotFound
        } else {
            RepositoryError::Query(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for one sidecar's HTTP API.
#[derive(Debug, Clone)]
pub struct SidecarClient {
    base_url: String,
    workflow_api_version: String,
    workflow_component: String,
    /// App that serves the workflow API, reached by service invocation.
    workflow_app: Option<String>,
    http: reqwest::Client,
}

impl SidecarClient {
    /// Client for the sidecar at `base_url` (e.g. `http://localhost:3500`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("snacktopus/0.1")
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            workflow_api_version: DEFAULT_WORKFLOW_API_VERSION.to_string(),
            workflow_component: DEFAULT_WORKFLOW_COMPONENT.to_string(),
            workflow_app: None,
            http,
        }
    }

    /// Client for a sidecar listening on localhost at `port`.
    pub fn for_port(port: u16) -> Self {
        Self::new(format!("http://localhost:{port}"))
    }

    /// Select the workflow API version segment and workflow component.
    pub fn with_workflow_api(mut self, version: impl Into<String>, component: impl Into<String>) -> Self {
        self.workflow_api_version = version.into();
        self.workflow_component = component.into();
        self
    }

    /// Send workflow calls to `app_id` through this sidecar's service
    /// invocation API instead of to the sidecar's own workflow engine.
    ///
    /// The sidecar's engine only knows instances owned by its own app, so
    /// this is how a CLI next to any sidecar reaches the workflow host.
    pub fn via_app(mut self, app_id: impl Into<String>) -> Self {
        self.workflow_app = Some(app_id.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn workflow_url(&self, path: &str) -> String {
        let route = format!(
            "/{}/workflows/{}{}",
            self.workflow_api_version, self.workflow_component, path
        );
        match &self.workflow_app {
            Some(app) => format!("{}/v1.0/invoke/{app}/method{route}", self.base_url),
            None => format!("{}{route}", self.base_url),
        }
    }

    // -----------------------------------------------------------------------
    // Health and metadata
    // -----------------------------------------------------------------------

    pub async fn healthz(&self) -> Result<(), SidecarError> {
        let resp = self.http.get(self.url("/v1.0/healthz")).send().await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn metadata(&self) -> Result<SidecarMetadata, SidecarError> {
        let resp = self.http.get(self.url("/v1.0/metadata")).send().await?;
        decode(check(resp).await?).await
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub async fn save_state(&self, store: &str, entries: &[StateEntry]) -> Result<(), SidecarError> {
        let resp = self
            .http
            .post(self.url(&format!("/v1.0/state/{store}")))
            .json(entries)
            .send()
            .await?;
        check(resp).await?;
        debug!(store, count = entries.len(), "saved state");
        Ok(())
    }

    /// Returns `None` when the key does not exist (the sidecar answers 204).
    pub async fn get_state(&self, store: &str, key: &str) -> Result<Option<Value>, SidecarError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1.0/state/{store}/{key}")))
            .send()
            .await?;
        let resp = check(resp).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| SidecarError::Decode(e.to_string()))
    }

    pub async fn delete_state(&self, store: &str, key: &str) -> Result<(), SidecarError> {
        let resp = self
            .http
            .delete(self.url(&format!("/v1.0/state/{store}/{key}")))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pub/sub
    // -----------------------------------------------------------------------

    pub async fn publish(&self, pubsub: &str, topic: &str, data: &Value) -> Result<(), SidecarError> {
        let resp = self
            .http
            .post(self.url(&format!("/v1.0/publish/{pubsub}/{topic}")))
            .json(data)
            .send()
            .await?;
        check(resp).await?;
        debug!(pubsub, topic, "published message");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Secrets
    // -----------------------------------------------------------------------

    /// Returns `None` when the store answers 404 or 204 for `name`.
    pub async fn get_secret(&self, store: &str, name: &str) -> Result<Option<BTreeMap<String, String>>, SidecarError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1.0/secrets/{store}/{name}")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND || resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(check(resp).await?).await.map(Some)
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Start `workflow_name`, returning the instance ID the sidecar assigned.
    pub async fn start_workflow(
        &self,
        workflow_name: &str,
        instance_id: Option<&str>,
        input: Option<&Value>,
    ) -> Result<String, SidecarError> {
        let mut req = self
            .http
            .post(self.workflow_url(&format!("/{workflow_name}/start")));
        if let Some(id) = instance_id {
            req = req.query(&[("instanceID", id)]);
        }
        let body = input.cloned().unwrap_or_else(|| serde_json::json!({}));
        let resp = check(req.json(&body).send().await?).await?;
        let started: WorkflowStartResponse = decode(resp).await?;
        Ok(started.instance_id)
    }

    pub async fn get_workflow(&self, instance_id: &str) -> Result<WorkflowState, SidecarError> {
        let resp = self
            .http
            .get(self.workflow_url(&format!("/{instance_id}")))
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    pub async fn raise_event(&self, instance_id: &str, event_name: &str, data: &Value) -> Result<(), SidecarError> {
        let resp = self
            .http
            .post(self.workflow_url(&format!("/{instance_id}/raiseEvent/{event_name}")))
            .json(data)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn terminate_workflow(&self, instance_id: &str) -> Result<(), SidecarError> {
        self.workflow_action(instance_id, "terminate").await
    }

    pub async fn purge_workflow(&self, instance_id: &str) -> Result<(), SidecarError> {
        self.workflow_action(instance_id, "purge").await
    }

    async fn workflow_action(&self, instance_id: &str, action: &str) -> Result<(), SidecarError> {
        let resp = self
            .http
            .post(self.workflow_url(&format!("/{instance_id}/{action}")))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn check(resp: Response) -> Result<Response, SidecarError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SidecarError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, SidecarError> {
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SidecarError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dapr::fake::{FAKE_WORKFLOW_APP, FakeSidecar};

    #[tokio::test]
    async fn test_healthz_and_metadata() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url());

        client.healthz().await.unwrap();
        let meta = client.metadata().await.unwrap();
        assert_eq!(meta.id, "fake-app");
        assert!(meta.has_component("statestore"));
        assert!(meta.has_component("events"));
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url());

        assert_eq!(client.get_state("statestore", "smoke:key").await.unwrap(), None);

        client
            .save_state(
                "statestore",
                &[StateEntry {
                    key: "smoke:key".to_string(),
                    value: serde_json::json!({ "ok": true }),
                }],
            )
            .await
            .unwrap();
        assert_eq!(
            client.get_state("statestore", "smoke:key").await.unwrap(),
            Some(serde_json::json!({ "ok": true }))
        );

        client.delete_state("statestore", "smoke:key").await.unwrap();
        assert_eq!(client.get_state("statestore", "smoke:key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_is_recorded() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url());

        client
            .publish("events", "smoke.topic", &serde_json::json!({ "hello": "world" }))
            .await
            .unwrap();

        let published = sidecar.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "events/smoke.topic");
        assert_eq!(published[0].1, serde_json::json!({ "hello": "world" }));
    }

    #[tokio::test]
    async fn test_secret_lookup() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url());

        let secret = client.get_secret("localsecret", "ollama").await.unwrap().unwrap();
        assert_eq!(secret.get("apiKey").map(String::as_str), Some("fake-key"));
        assert!(client.get_secret("localsecret", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_workflow_lifecycle() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url());

        let id = client
            .start_workflow("hello_snacktopus", Some("smoke-wf-1"), None)
            .await
            .unwrap();
        assert_eq!(id, "smoke-wf-1");

        let state = client.get_workflow("smoke-wf-1").await.unwrap();
        assert_eq!(state.workflow_name, "hello_snacktopus");
        assert_eq!(state.runtime_status, "RUNNING");

        client
            .raise_event("smoke-wf-1", "humanApproval", &serde_json::json!({ "verdict": "approved" }))
            .await
            .unwrap();
        assert_eq!(sidecar.raised(), vec![("smoke-wf-1".to_string(), "humanApproval".to_string())]);

        client.terminate_workflow("smoke-wf-1").await.unwrap();
        let state = client.get_workflow("smoke-wf-1").await.unwrap();
        assert_eq!(state.runtime_status, "TERMINATED");
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_status_error() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url());

        let err = client.get_workflow("nope").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(matches!(RepositoryError::from(err), RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_connection_refused_is_detected() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = SidecarClient::for_port(port);
        let err = client.healthz().await.unwrap_err();
        assert!(err.is_connection_refused(), "unexpected error: {err:?}");
        assert!(matches!(RepositoryError::from(err), RepositoryError::Connection));
    }

    #[test]
    fn test_workflow_url_uses_api_version_and_component() {
        let client = SidecarClient::new("http://localhost:3500/").with_workflow_api("v1.0-alpha1", "dapr");
        assert_eq!(client.base_url(), "http://localhost:3500");
        assert_eq!(
            client.workflow_url("/smoke-wf-1"),
            "http://localhost:3500/v1.0-alpha1/workflows/dapr/smoke-wf-1"
        );

        let invoked = client.via_app("workflow-host");
        assert_eq!(
            invoked.workflow_url("/smoke-wf-1/raiseEvent/humanApproval"),
            "http://localhost:3500/v1.0/invoke/workflow-host/method/v1.0-alpha1/workflows/dapr/smoke-wf-1/raiseEvent/humanApproval"
        );
    }

    #[tokio::test]
    async fn test_workflow_calls_reach_invoked_app() {
        let sidecar = FakeSidecar::start().await;
        let client = SidecarClient::new(sidecar.url()).via_app(FAKE_WORKFLOW_APP);

        client
            .start_workflow("hello_snacktopus", Some("invoked-1"), None)
            .await
            .unwrap();
        client
            .raise_event("invoked-1", "humanApproval", &serde_json::json!(null))
            .await
            .unwrap();
        assert_eq!(sidecar.raised(), vec![("invoked-1".to_string(), "humanApproval".to_string())]);

        // Nothing answers for other app ids.
        let stray = SidecarClient::new(sidecar.url()).via_app("agent-shell");
        assert_eq!(stray.get_workflow("invoked-1").await.unwrap_err().status(), Some(404));
    }
}

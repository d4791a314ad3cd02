//! Workflow host: serves the sidecar's workflow management API on top of the
//! embedded runtime.
//!
//! The same routes are mounted under `/v1.0-beta1` and `/v1.0-alpha1`, so
//! both current clients and the smoke runner's alpha paths work unchanged.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use snacktopus_core::workflow::WorkflowError;
use snacktopus_types::sidecar::{WorkflowStartResponse, WorkflowState};

use super::error::AppError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let workflows = Router::new()
        .route("/workflows/{component}/{id}", get(get_workflow))
        .route("/workflows/{component}/instances/{id}", get(get_workflow))
        .route("/workflows/{component}/{id}/start", post(start_workflow))
        .route("/workflows/{component}/{id}/raiseEvent/{event}", post(raise_event))
        .route("/workflows/{component}/{id}/terminate", post(terminate_workflow))
        .route("/workflows/{component}/{id}/pause", post(pause_workflow))
        .route("/workflows/{component}/{id}/resume", post(resume_workflow))
        .route("/workflows/{component}/{id}/purge", post(purge_workflow));

    Router::new()
        .route("/healthz", get(super::agent_shell::healthz))
        .route("/v1.0/healthz", get(sidecar_healthz))
        .nest("/v1.0-beta1", workflows.clone())
        .nest("/v1.0-alpha1", workflows)
        .layer(super::cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StartQuery {
    #[serde(rename = "instanceID")]
    instance_id: Option<String>,
}

fn ensure_component(state: &AppState, component: &str) -> Result<(), AppError> {
    if component == state.workflow_component {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("workflow component '{component}' is not served here")))
    }
}

/// An empty body means "no payload"; anything else must be JSON.
fn parse_payload(body: &Bytes) -> Result<Option<Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::Validation(format!("request body is not valid JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /v1.0/healthz - sidecar-style liveness (no body).
async fn sidecar_healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// POST /workflows/{component}/{name}/start?instanceID=
async fn start_workflow(
    State(state): State<AppState>,
    Path((component, name)): Path<(String, String)>,
    Query(query): Query<StartQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<WorkflowStartResponse>), AppError> {
    ensure_component(&state, &component)?;
    let input = parse_payload(&body)?;
    let instance_id = state
        .runtime
        .schedule_new_workflow(&name, query.instance_id, input)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(WorkflowStartResponse { instance_id })))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path((component, id)): Path<(String, String)>,
) -> Result<Json<WorkflowState>, AppError> {
    ensure_component(&state, &component)?;
    let instance = state
        .runtime
        .get_instance(&id)
        .await?
        .ok_or(WorkflowError::InstanceNotFound(id))?;
    Ok(Json(WorkflowState::from_instance(&instance)))
}

async fn raise_event(
    State(state): State<AppState>,
    Path((component, id, event)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    ensure_component(&state, &component)?;
    let payload = parse_payload(&body)?;
    state.runtime.raise_event(&id, &event, payload).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn terminate_workflow(
    State(state): State<AppState>,
    Path((component, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    ensure_component(&state, &component)?;
    state.runtime.terminate(&id, None).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn pause_workflow(
    State(state): State<AppState>,
    Path((component, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    ensure_component(&state, &component)?;
    state.runtime.suspend(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn resume_workflow(
    State(state): State<AppState>,
    Path((component, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    ensure_component(&state, &component)?;
    state.runtime.resume(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn purge_workflow(
    State(state): State<AppState>,
    Path((component, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    ensure_component(&state, &component)?;
    state.runtime.purge(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use snacktopus_core::workflow::snacktopus::{HELLO_WORKFLOW, SAGA_WORKFLOW};
    use snacktopus_types::workflow::WorkflowRuntimeStatus;
    use std::time::Duration;
    use tower::ServiceExt;

    const WAIT: Duration = Duration::from_secs(5);

    async fn started_state() -> AppState {
        let state = AppState::ephemeral();
        state.runtime.start().await.unwrap();
        state
    }

    async fn wait_for_running(state: &AppState, id: &str) {
        tokio::time::timeout(WAIT, async {
            loop {
                let instance = state.runtime.get_instance(id).await.unwrap();
                if instance.map(|i| i.status) == Some(WorkflowRuntimeStatus::Running) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("instance never started running");
    }

    async fn send(state: &AppState, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn hello_runs_to_completion_over_alpha_api() {
        let state = started_state().await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/v1.0-alpha1/workflows/dapr/hello_snacktopus/start?instanceID=smoke-wf-1",
            "{}",
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "instanceID": "smoke-wf-1" }));

        state.runtime.wait_for_completion("smoke-wf-1", WAIT).await.unwrap();

        let (status, body) = send(
            &state,
            Method::GET,
            "/v1.0-alpha1/workflows/dapr/instances/smoke-wf-1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["runtimeStatus"], "COMPLETED");
        assert_eq!(body["workflowName"], HELLO_WORKFLOW);
        assert!(body["output"].as_str().unwrap().contains("Workflow says hi"));
    }

    #[tokio::test]
    async fn start_without_id_generates_one() {
        let state = started_state().await;
        let (status, body) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/dapr/hello_snacktopus/start",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["instanceID"].as_str().unwrap();
        assert!(!id.is_empty());

        let done = state.runtime.wait_for_completion(id, WAIT).await.unwrap();
        assert_eq!(done.output, Some(json!("Workflow says hi to Snacktopus!")));
    }

    #[tokio::test]
    async fn saga_completes_after_approval_event() {
        let state = started_state().await;
        let (status, _) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/dapr/snacktopus_saga/start?instanceID=saga-1",
            r#"{"requester":"ana","snack":"nachos"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/dapr/saga-1/raiseEvent/humanApproval",
            r#"{"verdict":"approved","notes":"enjoy"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let done = state.runtime.wait_for_completion("saga-1", WAIT).await.unwrap();
        assert_eq!(done.workflow_name, SAGA_WORKFLOW);
        assert_eq!(done.status, WorkflowRuntimeStatus::Completed);
        let output = done.output.unwrap();
        assert_eq!(output["verdict"], "approved");
        assert_eq!(output["notes"], "enjoy");
        assert_eq!(output["dispatched"], true);
    }

    #[tokio::test]
    async fn duplicate_running_instance_conflicts() {
        let state = started_state().await;
        let uri = "/v1.0-beta1/workflows/dapr/snacktopus_saga/start?instanceID=saga-dup";
        let input = r#"{"requester":"ana","snack":"chips"}"#;

        let (status, _) = send(&state, Method::POST, uri, input).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_running(&state, "saga-dup").await;
        let (status, body) = send(&state, Method::POST, uri, input).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errorCode"], "ERR_INSTANCE_ID_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn pause_resume_terminate_and_purge() {
        let state = started_state().await;
        let base = "/v1.0-beta1/workflows/dapr";
        send(
            &state,
            Method::POST,
            &format!("{base}/snacktopus_saga/start?instanceID=saga-ops"),
            r#"{"requester":"ana","snack":"pretzels"}"#,
        )
        .await;
        wait_for_running(&state, "saga-ops").await;

        let (status, _) = send(&state, Method::POST, &format!("{base}/saga-ops/pause"), "").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (_, body) = send(&state, Method::GET, &format!("{base}/saga-ops"), "").await;
        assert_eq!(body["runtimeStatus"], "SUSPENDED");

        let (status, _) = send(&state, Method::POST, &format!("{base}/saga-ops/resume"), "").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(&state, Method::POST, &format!("{base}/saga-ops/purge"), "").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errorCode"], "ERR_INSTANCE_STATE_CONFLICT");

        let (status, _) = send(&state, Method::POST, &format!("{base}/saga-ops/terminate"), "").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let done = state.runtime.wait_for_completion("saga-ops", WAIT).await.unwrap();
        assert_eq!(done.status, WorkflowRuntimeStatus::Terminated);

        let (status, _) = send(&state, Method::POST, &format!("{base}/saga-ops/purge"), "").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, body) = send(&state, Method::GET, &format!("{base}/saga-ops"), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "ERR_INSTANCE_ID_NOT_FOUND");
    }

    #[tokio::test]
    async fn rejects_unknown_workflow_component_and_bad_json() {
        let state = started_state().await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/dapr/no_such_workflow/start",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "ERR_WORKFLOW_NOT_REGISTERED");

        let (status, body) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/other/hello_snacktopus/start",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "ERR_NOT_FOUND");

        let (status, body) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/dapr/hello_snacktopus/start",
            "{not json",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "ERR_MALFORMED_REQUEST");
    }

    #[tokio::test]
    async fn raising_on_missing_instance_is_404() {
        let state = started_state().await;
        let (status, body) = send(
            &state,
            Method::POST,
            "/v1.0-beta1/workflows/dapr/ghost/raiseEvent/humanApproval",
            r#"{"verdict":"approved"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "ERR_INSTANCE_ID_NOT_FOUND");
    }

    #[tokio::test]
    async fn health_endpoints() {
        let state = AppState::ephemeral();
        let (status, body) = send(&state, Method::GET, "/healthz", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));

        let (status, body) = send(&state, Method::GET, "/v1.0/healthz", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
    }
}

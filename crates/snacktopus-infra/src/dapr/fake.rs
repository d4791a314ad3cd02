//! In-process stand-in for a Dapr sidecar, for client and adapter tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use snacktopus_types::sidecar::StateEntry;

#[derive(Default)]
struct FakeState {
    state: HashMap<String, Value>,
    published: Vec<(String, Value)>,
    raised: Vec<(String, String)>,
    workflows: HashMap<String, (String, String)>,
}

type Shared = Arc<Mutex<FakeState>>;

/// App id the fake forwards service-invocation calls to.
pub(crate) const FAKE_WORKFLOW_APP: &str = "workflow-host";

pub(crate) struct FakeSidecar {
    url: String,
    shared: Shared,
}

impl FakeSidecar {
    pub(crate) async fn start() -> Self {
        let shared: Shared = Arc::default();
        let workflows = Router::new()
            .route("/v1.0-beta1/workflows/dapr/{id}", get(get_workflow))
            .route("/v1.0-beta1/workflows/dapr/{id}/{action}", post(workflow_action))
            .route("/v1.0-beta1/workflows/dapr/{id}/raiseEvent/{event}", post(raise_event));
        let app = Router::new()
            .route("/v1.0/healthz", get(|| async { StatusCode::NO_CONTENT }))
            .route("/v1.0/metadata", get(metadata))
            .route("/v1.0/state/{store}", post(save_state))
            .route("/v1.0/state/{store}/{key}", get(get_state).delete(delete_state))
            .route("/v1.0/publish/{pubsub}/{topic}", post(publish))
            .route("/v1.0/secrets/{store}/{name}", get(get_secret))
            .nest(&format!("/v1.0/invoke/{FAKE_WORKFLOW_APP}/method"), workflows.clone())
            .merge(workflows)
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            shared,
        }
    }

    pub(crate) fn url(&self) -> String {
        self.url.clone()
    }

    pub(crate) fn published(&self) -> Vec<(String, Value)> {
        self.shared.lock().unwrap().published.clone()
    }

    pub(crate) fn raised(&self) -> Vec<(String, String)> {
        self.shared.lock().unwrap().raised.clone()
    }
}

async fn metadata() -> Json<Value> {
    Json(json!({
        "id": "fake-app",
        "components": [
            {"name": "statestore", "type": "state.in-memory", "version": "v1"},
            {"name": "events", "type": "pubsub.in-memory", "version": "v1"},
            {"name": "localsecret", "type": "secretstores.local.file", "version": "v1"}
        ]
    }))
}

async fn save_state(
    State(shared): State<Shared>,
    Path(store): Path<String>,
    Json(entries): Json<Vec<StateEntry>>,
) -> StatusCode {
    let mut s = shared.lock().unwrap();
    for entry in entries {
        s.state.insert(format!("{store}/{}", entry.key), entry.value);
    }
    StatusCode::NO_CONTENT
}

async fn get_state(State(shared): State<Shared>, Path((store, key)): Path<(String, String)>) -> Response {
    match shared.lock().unwrap().state.get(&format!("{store}/{key}")) {
        Some(value) => Json(value.clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn delete_state(State(shared): State<Shared>, Path((store, key)): Path<(String, String)>) -> StatusCode {
    shared.lock().unwrap().state.remove(&format!("{store}/{key}"));
    StatusCode::NO_CONTENT
}

async fn publish(
    State(shared): State<Shared>,
    Path((pubsub, topic)): Path<(String, String)>,
    Json(data): Json<Value>,
) -> StatusCode {
    shared
        .lock()
        .unwrap()
        .published
        .push((format!("{pubsub}/{topic}"), data));
    StatusCode::NO_CONTENT
}

async fn get_secret(Path((_store, name)): Path<(String, String)>) -> Response {
    if name == "ollama" {
        Json(json!({ "apiKey": "fake-key" })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn get_workflow(State(shared): State<Shared>, Path(id): Path<String>) -> Response {
    match shared.lock().unwrap().workflows.get(&id) {
        Some((name, status)) => Json(json!({
            "instanceID": id,
            "workflowName": name,
            "runtimeStatus": status,
            "properties": {}
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "errorCode": "ERR_INSTANCE_ID_NOT_FOUND", "message": "no such instance" })),
        )
            .into_response(),
    }
}

async fn workflow_action(
    State(shared): State<Shared>,
    Path((id, action)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut s = shared.lock().unwrap();
    match action.as_str() {
        "start" => {
            let instance_id = query.get("instanceID").cloned().unwrap_or_else(|| "generated".to_string());
            s.workflows
                .insert(instance_id.clone(), (id, "RUNNING".to_string()));
            (StatusCode::ACCEPTED, Json(json!({ "instanceID": instance_id }))).into_response()
        }
        "terminate" => match s.workflows.get_mut(&id) {
            Some(entry) => {
                entry.1 = "TERMINATED".to_string();
                StatusCode::ACCEPTED.into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        },
        "purge" => {
            s.workflows.remove(&id);
            StatusCode::ACCEPTED.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn raise_event(State(shared): State<Shared>, Path((id, event)): Path<(String, String)>) -> StatusCode {
    shared.lock().unwrap().raised.push((id, event));
    StatusCode::ACCEPTED
}

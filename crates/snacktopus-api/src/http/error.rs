//! Application error type mapping to HTTP status codes.
//!
//! Error bodies follow the sidecar's shape, `{"errorCode": ..., "message": ...}`,
//! so clients can treat the workflow host and a real sidecar alike.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use snacktopus_core::workflow::WorkflowError;

#[derive(Debug)]
pub enum AppError {
    /// Runtime errors.
    Workflow(WorkflowError),
    /// Malformed request (bad JSON, missing name).
    Validation(String),
    /// Unknown route target, e.g. a workflow component that is not served.
    NotFound(String),
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Workflow(e) => {
                let (status, code) = match e {
                    WorkflowError::WorkflowNotRegistered(_) => (StatusCode::NOT_FOUND, "ERR_WORKFLOW_NOT_REGISTERED"),
                    WorkflowError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, "ERR_INSTANCE_ID_NOT_FOUND"),
                    WorkflowError::InstanceAlreadyExists(_) => {
                        (StatusCode::CONFLICT, "ERR_INSTANCE_ID_ALREADY_EXISTS")
                    }
                    WorkflowError::InstanceNotRunning { .. } | WorkflowError::InstanceNotTerminal { .. } => {
                        (StatusCode::CONFLICT, "ERR_INSTANCE_STATE_CONFLICT")
                    }
                    WorkflowError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "ERR_MALFORMED_REQUEST"),
                    WorkflowError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "ERR_RUNTIME_SHUTTING_DOWN"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "ERR_WORKFLOW_INTERNAL"),
                };
                (status, code, e.to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "ERR_MALFORMED_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        } else {
            tracing::debug!(code, %message, "request rejected");
        }

        (status, Json(json!({ "errorCode": code, "message": message }))).into_response()
    }
}

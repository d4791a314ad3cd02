//! The Snacktopus workflows and their activities.
//!
//! - `hello_snacktopus` greets a name through the `greet` activity; the smoke
//!   runner uses it to prove the workflow host end to end.
//! - `snacktopus_saga` records a snack request, waits for a human verdict on
//!   the `humanApproval` event, then either dispatches the snack or notifies
//!   the requester of the rejection. A missing verdict counts as `timeout`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use snacktopus_types::approval::{ApprovalVerdict, HUMAN_APPROVAL_EVENT, HumanApproval};
use snacktopus_types::sidecar::StateEntry;

use super::context::{ActivityContext, WorkflowContext};
use super::error::{ActivityError, WorkflowError};
use super::registry::WorkflowRegistry;
use crate::pubsub::DynEventPublisher;
use crate::storage::state_store::DynStateStore;

pub const HELLO_WORKFLOW: &str = "hello_snacktopus";
pub const SAGA_WORKFLOW: &str = "snacktopus_saga";

pub const GREET_ACTIVITY: &str = "greet";
pub const RECORD_REQUEST_ACTIVITY: &str = "record_snack_request";
pub const DISPATCH_ACTIVITY: &str = "dispatch_snack";
pub const NOTIFY_REJECTION_ACTIVITY: &str = "notify_rejection";

pub const SNACK_DISPATCHED_TOPIC: &str = "snack.dispatched";
pub const SNACK_REJECTED_TOPIC: &str = "snack.rejected";

pub const DEFAULT_GREETING_NAME: &str = "Snacktopus";

/// State key under which a saga stores its request.
pub fn snack_request_key(instance_id: &str) -> String {
    format!("snack-request:{instance_id}")
}

/// Ports the saga's activities talk to.
#[derive(Clone)]
pub struct SnacktopusServices {
    pub state_store: DynStateStore,
    pub publisher: DynEventPublisher,
    /// Used when the saga input does not carry `approval_timeout_secs`.
    pub approval_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct SnackRequest {
    requester: String,
    snack: String,
    #[serde(default)]
    approval_timeout_secs: Option<u64>,
}

/// Register both workflows and all four activities.
pub fn register_snacktopus(registry: &mut WorkflowRegistry, services: SnacktopusServices) -> Result<(), WorkflowError> {
    registry.register_workflow(HELLO_WORKFLOW, hello_snacktopus)?;
    registry.register_activity(GREET_ACTIVITY, greet)?;

    let default_timeout = services.approval_timeout;
    registry.register_workflow(SAGA_WORKFLOW, move |ctx, input| snacktopus_saga(ctx, input, default_timeout))?;

    let store = services.state_store.clone();
    registry.register_activity(RECORD_REQUEST_ACTIVITY, move |ctx, input| {
        record_snack_request(store.clone(), ctx, input)
    })?;

    let publisher = services.publisher.clone();
    registry.register_activity(DISPATCH_ACTIVITY, move |ctx, input| {
        publish_outcome(publisher.clone(), SNACK_DISPATCHED_TOPIC, ctx, input)
    })?;

    let publisher = services.publisher;
    registry.register_activity(NOTIFY_REJECTION_ACTIVITY, move |ctx, input| {
        publish_outcome(publisher.clone(), SNACK_REJECTED_TOPIC, ctx, input)
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// hello_snacktopus
// ---------------------------------------------------------------------------

fn greeting_name(input: Option<&Value>) -> String {
    let name = match input {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(v) => v.get("name").and_then(Value::as_str),
        None => None,
    };
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_GREETING_NAME)
        .to_string()
}

async fn hello_snacktopus(ctx: WorkflowContext, input: Option<Value>) -> Result<Value, WorkflowError> {
    let name = greeting_name(input.as_ref());
    if !ctx.is_replaying() {
        tracing::info!(instance_id = ctx.instance_id(), name = %name, "greeting");
    }
    ctx.call_activity(GREET_ACTIVITY, Some(json!({ "name": name })), None)
        .await
}

async fn greet(_ctx: ActivityContext, input: Option<Value>) -> Result<Value, ActivityError> {
    let name = greeting_name(input.as_ref());
    Ok(Value::String(format!("Workflow says hi to {name}!")))
}

// ---------------------------------------------------------------------------
// snacktopus_saga
// ---------------------------------------------------------------------------

async fn snacktopus_saga(
    ctx: WorkflowContext,
    input: Option<Value>,
    default_timeout: Duration,
) -> Result<Value, WorkflowError> {
    let request: SnackRequest = input
        .ok_or_else(|| WorkflowError::InvalidInput("snack request is required".to_string()))
        .and_then(|v| serde_json::from_value(v).map_err(|e| WorkflowError::InvalidInput(e.to_string())))?;
    let instance_id = ctx.instance_id().to_string();

    ctx.call_activity(
        RECORD_REQUEST_ACTIVITY,
        Some(json!({
            "instance_id": instance_id,
            "requester": request.requester,
            "snack": request.snack,
        })),
        None,
    )
    .await?;

    ctx.set_custom_status("awaiting_approval").await?;
    let timeout = request
        .approval_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);

    let (verdict, notes) = match ctx.wait_for_external_event(HUMAN_APPROVAL_EVENT, Some(timeout)).await {
        Ok(payload) => match serde_json::from_value::<HumanApproval>(payload) {
            Ok(approval) => (approval.verdict, approval.notes),
            Err(e) => (ApprovalVerdict::Rejected, Some(format!("unreadable approval: {e}"))),
        },
        Err(WorkflowError::EventTimeout(_)) => (ApprovalVerdict::Timeout, None),
        Err(e) => return Err(e),
    };

    let dispatched = verdict == ApprovalVerdict::Approved;
    let outcome = json!({
        "instance_id": instance_id,
        "requester": request.requester,
        "snack": request.snack,
        "verdict": verdict,
        "notes": notes,
    });
    let activity = if dispatched {
        DISPATCH_ACTIVITY
    } else {
        NOTIFY_REJECTION_ACTIVITY
    };
    ctx.call_activity(activity, Some(outcome), None).await?;
    ctx.set_custom_status(verdict.as_str()).await?;

    Ok(json!({
        "instance_id": instance_id,
        "verdict": verdict,
        "notes": notes,
        "dispatched": dispatched,
    }))
}

fn require_object(input: Option<Value>) -> Result<serde_json::Map<String, Value>, ActivityError> {
    match input {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ActivityError::InvalidInput("expected a JSON object".to_string())),
    }
}

async fn record_snack_request(
    store: DynStateStore,
    ctx: ActivityContext,
    input: Option<Value>,
) -> Result<Value, ActivityError> {
    let mut record = require_object(input)?;
    record.insert("status".to_string(), json!("pending_approval"));
    record.insert("idempotency_key".to_string(), json!(ctx.idempotency_key));

    let key = snack_request_key(&ctx.instance_id);
    store
        .save_boxed(&[StateEntry {
            key: key.clone(),
            value: Value::Object(record),
        }])
        .await?;
    tracing::debug!(key = %key, "recorded snack request");
    Ok(json!({ "key": key }))
}

async fn publish_outcome(
    publisher: DynEventPublisher,
    topic: &'static str,
    ctx: ActivityContext,
    input: Option<Value>,
) -> Result<Value, ActivityError> {
    let mut message = require_object(input)?;
    message.insert("idempotency_key".to_string(), json!(ctx.idempotency_key));
    publisher.publish_boxed(topic, &Value::Object(message)).await?;
    tracing::info!(topic, instance_id = %ctx.instance_id, "published snack outcome");
    Ok(json!({ "topic": topic }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

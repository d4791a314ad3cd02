//! `send-event`: raise external events against workflow instances.

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;
use tracing::Instrument;

use snacktopus_infra::dapr::SidecarClient;
use snacktopus_observe::telemetry::traced_span;
use snacktopus_types::approval::{ApprovalVerdict, HUMAN_APPROVAL_EVENT, HumanApproval};
use snacktopus_types::config::Settings;

/// Body of a `humanApproval` event. Rejects unknown verdicts before anything
/// is sent.
pub fn human_payload(verdict: &str, notes: Option<String>) -> Result<Value> {
    let verdict: ApprovalVerdict = verdict.parse().map_err(anyhow::Error::msg)?;
    Ok(serde_json::to_value(HumanApproval { verdict, notes })?)
}

/// Parse `--data`, treating a missing value as JSON null.
pub fn raw_payload(data: Option<&str>) -> Result<Value> {
    match data {
        Some(text) => serde_json::from_str(text).context("--data is not valid JSON"),
        None => Ok(Value::Null),
    }
}

/// Client for the workflow API: the workflow host directly when `host_url`
/// is given, otherwise the local sidecar invoking the workflow host's app.
pub fn target_client(settings: &Settings, host_url: Option<&str>) -> SidecarClient {
    let client = match host_url {
        Some(url) => SidecarClient::new(url),
        None => SidecarClient::for_port(settings.dapr_http_port).via_app(settings.workflow_app_id.clone()),
    };
    client.with_workflow_api(
        settings.workflow_api_version.clone(),
        settings.workflow_component.clone(),
    )
}

pub async fn send_human(
    client: &SidecarClient,
    instance_id: &str,
    verdict: &str,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let payload = human_payload(verdict, notes)?;
    send_event(client, instance_id, HUMAN_APPROVAL_EVENT, &payload, json).await
}

pub async fn send_event(
    client: &SidecarClient,
    instance_id: &str,
    event_name: &str,
    payload: &Value,
    json: bool,
) -> Result<()> {
    client
        .raise_event(instance_id, event_name, payload)
        .instrument(traced_span("send_event"))
        .await
        .with_context(|| format!("failed to raise '{event_name}' on instance '{instance_id}' via {}", client.base_url()))?;
    tracing::info!(instance_id, event_name, "event sent");

    if json {
        let out = serde_json::json!({
            "instance_id": instance_id,
            "event": event_name,
            "data": payload,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "  {} Sent {} to {} {}",
            style("ok").green(),
            style(event_name).cyan(),
            style(instance_id).cyan().bold(),
            style(payload).dim(),
        );
    }
    Ok(())
}

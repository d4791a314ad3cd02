//! Sidecar port discovery through the `dapr` CLI.
//!
//! `dapr list -o json` prints one entry per running sidecar. Entries without
//! an app id, or whose port is missing or unparseable, are skipped.

use std::collections::HashMap;
use std::time::Duration;

use snacktopus_types::sidecar::AppInstance;
use thiserror::Error;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to run dapr CLI: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("dapr list timed out after {0:?}")]
    Timeout(Duration),

    #[error("dapr list exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unparseable dapr list output: {0}")]
    Parse(String),
}

/// Map app id to sidecar HTTP port from `dapr list -o json` output.
pub fn parse_app_list(json: &str) -> Result<HashMap<String, u16>, DiscoveryError> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(HashMap::new());
    }

    let apps: Vec<AppInstance> = serde_json::from_str(trimmed).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
    Ok(apps
        .into_iter()
        .filter_map(|app| {
            let port = app.sidecar_port()?;
            let app_id = app.app_id.filter(|id| !id.trim().is_empty())?;
            Some((app_id, port))
        })
        .collect())
}

/// Run `dapr list -o json` and return the sidecar HTTP port of each app.
pub async fn discover_ports() -> Result<HashMap<String, u16>, DiscoveryError> {
    let output = tokio::time::timeout(
        DISCOVERY_TIMEOUT,
        tokio::process::Command::new("dapr")
            .args(["list", "-o", "json"])
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| DiscoveryError::Timeout(DISCOVERY_TIMEOUT))??;

    if !output.status.success() {
        return Err(DiscoveryError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let ports = parse_app_list(&String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!(apps = ports.len(), "discovered sidecar ports");
    Ok(ports)
}

//! `smoke`: probe the running stack and report one line per check.
//!
//! Checks never print; they return a [`CheckResult`] and the report is
//! rendered once at the end. Required checks decide the exit code, optional
//! ones (Ollama, Zipkin) are informational.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use console::style;
use serde::Serialize;
use serde_json::json;
use tracing::Instrument;

use snacktopus_core::workflow::snacktopus::HELLO_WORKFLOW;
use snacktopus_infra::dapr::{SidecarClient, SidecarError};
use snacktopus_infra::discovery::discover_ports;
use snacktopus_observe::telemetry::traced_span;
use snacktopus_types::config::Settings;
use snacktopus_types::sidecar::StateEntry;
use snacktopus_types::workflow::WorkflowRuntimeStatus;

pub const AGENT_APP_ID: &str = "agent-shell";
pub const WORKFLOW_APP_ID: &str = "workflow-host";

pub const SMOKE_STATE_KEY: &str = "smoke:key";
pub const SMOKE_TOPIC: &str = "smoke.topic";
pub const SMOKE_SECRET: &str = "ollama";
pub const SMOKE_INSTANCE_ID: &str = "smoke-wf-1";

/// The smoke workflow check talks to the alpha workflow API.
const SMOKE_WORKFLOW_API: &str = "v1.0-alpha1";
const ZIPKIN_HEALTH_URL: &str = "http://localhost:9411/health";

const HTTP_TIMEOUT: Duration = Duration::from_secs(2);
const WORKFLOW_POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const PORT_UNKNOWN: &str = "sidecar_port_unknown";
const WORKFLOW_PORT_UNKNOWN: &str = "workflow_sidecar_port_unknown";
const CONNECTION_REFUSED: &str = "connection_refused";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    /// Short, single-line summary.
    pub detail: String,
    /// Longer context, shown only for failures.
    pub diagnostics: Option<String>,
    pub duration_ms: u64,
    /// Optional checks are reported but never fail the run.
    pub required: bool,
}

struct Outcome {
    ok: bool,
    detail: String,
    diagnostics: Option<String>,
}

impl Outcome {
    fn pass(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
            diagnostics: None,
        }
    }

    fn fail(detail: impl Into<String>, diagnostics: Option<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            diagnostics,
        }
    }

    fn from_sidecar_error(err: &SidecarError) -> Self {
        if err.is_connection_refused() {
            return Self::fail(CONNECTION_REFUSED, Some(err.to_string()));
        }
        if err.is_timeout() {
            return Self::fail("timeout", Some(err.to_string()));
        }
        match err {
            SidecarError::Status { status, body } => Self::fail(format!("HTTP {status}"), Some(body.clone())),
            other => Self::fail("exception", Some(other.to_string())),
        }
    }

    fn from_http_error(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            Self::fail(CONNECTION_REFUSED, Some(err.to_string()))
        } else if err.is_timeout() {
            Self::fail("timeout", Some(err.to_string()))
        } else {
            Self::fail("exception", Some(err.to_string()))
        }
    }
}

async fn run_check<F>(name: &str, required: bool, check: F) -> CheckResult
where
    F: Future<Output = Outcome>,
{
    let started = Instant::now();
    let outcome = check
        .instrument(tracing::info_span!("smoke.check", snacktopus.smoke.check = name))
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(check = name, ok = outcome.ok, detail = %outcome.detail, duration_ms, "smoke check finished");

    CheckResult {
        name: name.to_string(),
        ok: outcome.ok,
        detail: outcome.detail,
        diagnostics: outcome.diagnostics,
        duration_ms,
        required,
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Everything the checks talk to. A `None` sidecar means its port could not
/// be determined.
#[derive(Debug, Clone)]
pub struct SmokeTargets {
    pub agent_url: String,
    pub agent_sidecar_url: Option<String>,
    pub workflow_sidecar_url: Option<String>,
    pub state_store: String,
    pub pubsub: String,
    pub secret_store: String,
    pub workflow_component: String,
    /// App id the workflow sidecar invokes for workflow calls.
    pub workflow_app_id: String,
    /// Ollama base URL; `None` skips the probe.
    pub ollama_url: Option<String>,
    /// Zipkin health URL; `None` skips the probe.
    pub zipkin_url: Option<String>,
}

impl SmokeTargets {
    pub fn new(
        settings: &Settings,
        agent_port: u16,
        agent_sidecar_port: Option<u16>,
        workflow_sidecar_port: Option<u16>,
        include_optional: bool,
    ) -> Self {
        Self {
            agent_url: format!("http://localhost:{agent_port}"),
            agent_sidecar_url: agent_sidecar_port.map(|p| format!("http://localhost:{p}")),
            workflow_sidecar_url: workflow_sidecar_port.map(|p| format!("http://localhost:{p}")),
            state_store: settings.state_store.clone(),
            pubsub: settings.pubsub.clone(),
            secret_store: settings.secret_store.clone(),
            workflow_component: settings.workflow_component.clone(),
            workflow_app_id: settings.workflow_app_id.clone(),
            ollama_url: include_optional.then(|| settings.ollama_endpoint.trim_end_matches('/').to_string()),
            zipkin_url: include_optional.then(|| ZIPKIN_HEALTH_URL.to_string()),
        }
    }

    fn agent_sidecar(&self) -> Option<SidecarClient> {
        self.agent_sidecar_url.as_deref().map(SidecarClient::new)
    }

    /// The workflow host's sidecar, forwarding workflow calls to the host app.
    fn workflow_sidecar(&self) -> Option<SidecarClient> {
        self.workflow_sidecar_url.as_deref().map(|url| {
            SidecarClient::new(url)
                .with_workflow_api(SMOKE_WORKFLOW_API, self.workflow_component.clone())
                .via_app(self.workflow_app_id.clone())
        })
    }
}

/// Resolve sidecar ports: explicit values win, the rest come from
/// `dapr list`. Returns the discovered map for display.
pub async fn resolve_ports(
    agent_sidecar_port: Option<u16>,
    workflow_sidecar_port: Option<u16>,
) -> (Option<u16>, Option<u16>, BTreeMap<String, u16>) {
    if agent_sidecar_port.is_some() && workflow_sidecar_port.is_some() {
        return (agent_sidecar_port, workflow_sidecar_port, BTreeMap::new());
    }

    let discovered: BTreeMap<String, u16> = match discover_ports().await {
        Ok(map) => map.into_iter().collect(),
        Err(err) => {
            tracing::debug!("sidecar discovery failed: {err}");
            BTreeMap::new()
        }
    };
    (
        agent_sidecar_port.or_else(|| discovered.get(AGENT_APP_ID).copied()),
        workflow_sidecar_port.or_else(|| discovered.get(WORKFLOW_APP_ID).copied()),
        discovered,
    )
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

async fn get_text(http: &reqwest::Client, url: &str) -> Result<(u16, String), reqwest::Error> {
    let resp = http.get(url).send().await?;
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    Ok((status, body))
}

async fn check_agent_health(http: &reqwest::Client, agent_url: &str) -> Outcome {
    match get_text(http, &format!("{agent_url}/healthz")).await {
        Ok((status, body)) => {
            let healthy = serde_json::from_str::<serde_json::Value>(&body)
                .map(|v| v["status"] == "ok")
                .unwrap_or(false);
            if status == 200 && healthy {
                Outcome::pass(format!("HTTP {status}"))
            } else {
                Outcome::fail(format!("HTTP {status}"), Some(body))
            }
        }
        Err(err) => Outcome::from_http_error(&err),
    }
}

async fn check_agent_root(http: &reqwest::Client, agent_url: &str) -> Outcome {
    match get_text(http, &format!("{agent_url}/")).await {
        Ok((status, body)) if status == 200 && body.contains("Snacktopus") => Outcome::pass(format!("HTTP {status}")),
        Ok((status, body)) => Outcome::fail(format!("HTTP {status}"), Some(body)),
        Err(err) => Outcome::from_http_error(&err),
    }
}

async fn check_agent_metadata(sidecar: Option<&SidecarClient>, required: &[&str]) -> Outcome {
    let Some(sidecar) = sidecar else {
        return Outcome::fail(PORT_UNKNOWN, Some("run discovery or set AGENT_SIDECAR_PORT".to_string()));
    };
    let metadata = match sidecar.metadata().await {
        Ok(metadata) => metadata,
        Err(err) => return Outcome::from_sidecar_error(&err),
    };

    let mut names: Vec<&str> = metadata.components.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !metadata.has_component(name))
        .collect();

    let detail = format!("components=[{}]", names.join(", "));
    if missing.is_empty() {
        Outcome::pass(detail)
    } else {
        Outcome::fail(detail, Some(format!("missing=[{}]", missing.join(", "))))
    }
}

async fn check_state_roundtrip(sidecar: Option<&SidecarClient>, store: &str) -> Outcome {
    let Some(sidecar) = sidecar else {
        return Outcome::fail(PORT_UNKNOWN, None);
    };
    let entry = StateEntry {
        key: SMOKE_STATE_KEY.to_string(),
        value: json!({ "ok": true }),
    };
    if let Err(err) = sidecar.save_state(store, &[entry]).await {
        return Outcome::from_sidecar_error(&err);
    }

    match sidecar.get_state(store, SMOKE_STATE_KEY).await {
        Ok(Some(value)) if value["ok"] == true => Outcome::pass("write=ok read=ok"),
        Ok(Some(value)) => Outcome::fail("write=ok read=mismatch", Some(value.to_string())),
        Ok(None) => Outcome::fail("write=ok read=missing", None),
        Err(err) => Outcome::from_sidecar_error(&err),
    }
}

async fn check_pubsub_publish(sidecar: Option<&SidecarClient>, pubsub: &str) -> Outcome {
    let Some(sidecar) = sidecar else {
        return Outcome::fail(PORT_UNKNOWN, None);
    };
    match sidecar.publish(pubsub, SMOKE_TOPIC, &json!({ "ping": "pong" })).await {
        Ok(()) => Outcome::pass(format!("published to {SMOKE_TOPIC}")),
        Err(err) => Outcome::from_sidecar_error(&err),
    }
}

async fn check_secret_fetch(sidecar: Option<&SidecarClient>, store: &str) -> Outcome {
    let Some(sidecar) = sidecar else {
        return Outcome::fail(PORT_UNKNOWN, None);
    };
    match sidecar.get_secret(store, SMOKE_SECRET).await {
        Ok(Some(fields)) if fields.contains_key("apiKey") => Outcome::pass("apiKey present"),
        // Report field names only; values are secret.
        Ok(Some(fields)) => Outcome::fail(
            "apiKey missing",
            Some(format!("fields=[{}]", fields.keys().cloned().collect::<Vec<_>>().join(", "))),
        ),
        Ok(None) => Outcome::fail("secret missing", Some(format!("{store}/{SMOKE_SECRET}"))),
        Err(err) => Outcome::from_sidecar_error(&err),
    }
}

async fn check_workflow_status(sidecar: Option<&SidecarClient>) -> Outcome {
    let Some(sidecar) = sidecar else {
        return Outcome::fail(WORKFLOW_PORT_UNKNOWN, None);
    };

    // A previous run may have left the instance behind.
    if let Err(err) = sidecar.purge_workflow(SMOKE_INSTANCE_ID).await {
        tracing::debug!("pre-run purge of {SMOKE_INSTANCE_ID} skipped: {err}");
    }

    if let Err(err) = sidecar
        .start_workflow(HELLO_WORKFLOW, Some(SMOKE_INSTANCE_ID), Some(&json!({})))
        .await
    {
        let outcome = Outcome::from_sidecar_error(&err);
        return Outcome::fail(format!("start {}", outcome.detail), outcome.diagnostics);
    }

    let deadline = tokio::time::Instant::now() + WORKFLOW_POLL_TIMEOUT;
    let state = loop {
        let state = match sidecar.get_workflow(SMOKE_INSTANCE_ID).await {
            Ok(state) => state,
            Err(err) => {
                let outcome = Outcome::from_sidecar_error(&err);
                return Outcome::fail(format!("query {}", outcome.detail), outcome.diagnostics);
            }
        };
        let finished = state.status().is_some_and(WorkflowRuntimeStatus::is_terminal);
        if finished || tokio::time::Instant::now() >= deadline {
            break state;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    let said_hi = state.output_text().is_some_and(|out| out.contains("Workflow says hi"));
    if state.status() == Some(WorkflowRuntimeStatus::Completed) && said_hi {
        Outcome::pass(state.runtime_status)
    } else {
        let diagnostics = serde_json::to_string(&state).ok();
        Outcome::fail(state.runtime_status, diagnostics)
    }
}

async fn check_http_ok(http: &reqwest::Client, url: &str) -> Outcome {
    match http.get(url).send().await {
        Ok(resp) if resp.status().is_success() => Outcome::pass(format!("HTTP {}", resp.status().as_u16())),
        Ok(resp) => Outcome::fail(format!("HTTP {}", resp.status().as_u16()), None),
        Err(err) => Outcome::from_http_error(&err),
    }
}

/// Run every check in order.
pub async fn run_checks(targets: &SmokeTargets) -> Vec<CheckResult> {
    let http = http_client();
    let agent_sidecar = targets.agent_sidecar();
    let workflow_sidecar = targets.workflow_sidecar();
    let required_components = [targets.state_store.as_str(), targets.pubsub.as_str()];

    let mut results = vec![
        run_check("agent:health", true, check_agent_health(&http, &targets.agent_url)).await,
        run_check("agent:root", true, check_agent_root(&http, &targets.agent_url)).await,
        run_check(
            "dapr:agent:metadata",
            true,
            check_agent_metadata(agent_sidecar.as_ref(), &required_components),
        )
        .await,
        run_check(
            "dapr:state:roundtrip",
            true,
            check_state_roundtrip(agent_sidecar.as_ref(), &targets.state_store),
        )
        .await,
        run_check(
            "dapr:pubsub:publish",
            true,
            check_pubsub_publish(agent_sidecar.as_ref(), &targets.pubsub),
        )
        .await,
        run_check(
            "dapr:secret:get",
            true,
            check_secret_fetch(agent_sidecar.as_ref(), &targets.secret_store),
        )
        .await,
        run_check("dapr:workflow:status", true, check_workflow_status(workflow_sidecar.as_ref())).await,
    ];

    if let Some(url) = &targets.ollama_url {
        results.push(run_check("ollama:tags", false, check_http_ok(&http, &format!("{url}/api/tags"))).await);
    }
    if let Some(url) = &targets.zipkin_url {
        results.push(run_check("zipkin:health", false, check_http_ok(&http, url)).await);
    }
    results
}

/// Poll the agent shell's health endpoint for up to `wait`.
pub async fn wait_for_agent(agent_url: &str, wait: Duration) -> bool {
    let http = http_client();
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if check_agent_health(&http, agent_url).await.ok {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub discovered: BTreeMap<String, u16>,
    pub warnings: Vec<String>,
    pub results: Vec<CheckResult>,
    pub duration_ms: u64,
}

impl SmokeReport {
    /// (passed, total) over required checks.
    pub fn required_summary(&self) -> (usize, usize) {
        let required = self.results.iter().filter(|r| r.required);
        let total = required.clone().count();
        let passed = required.filter(|r| r.ok).count();
        (passed, total)
    }

    pub fn exit_code(&self) -> i32 {
        let (passed, total) = self.required_summary();
        if passed == total { 0 } else { 1 }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.required && !r.ok)
    }

    pub fn hints(&self) -> Vec<&'static str> {
        let mut hints = Vec::new();
        if self.failures().any(|r| r.detail.contains(PORT_UNKNOWN)) {
            hints.push(
                "Hint: run `dapr list -o json` to verify sidecar ports; export AGENT_SIDECAR_PORT / WORKFLOW_SIDECAR_PORT if ordering changed.",
            );
        }
        if self.failures().any(|r| r.detail.ends_with(CONNECTION_REFUSED)) {
            hints.push(
                "Hint: make sure the sidecars and their dependencies (placement, redis) are up. Try `dapr init` then `dapr run -f manifests`.",
            );
        }
        hints
    }

    pub fn render(&self) -> String {
        let mut out = Vec::new();
        out.push(style("Snacktopus Smoke Tests").cyan().to_string());

        let ports = if self.discovered.is_empty() {
            "NONE".to_string()
        } else {
            self.discovered
                .iter()
                .map(|(app, port)| format!("{app}={port}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.push(style(format!("discovered sidecar ports: {ports}")).dim().to_string());
        for warning in &self.warnings {
            out.push(format!("{} {warning}", style("WARN").yellow()));
        }

        for r in &self.results {
            let symbol = if r.ok {
                style("✔").green()
            } else if r.required {
                style("✘").red()
            } else {
                style("✘").yellow()
            };
            let name = if r.required {
                r.name.clone()
            } else {
                format!("{} (optional)", r.name)
            };
            out.push(format!(
                " {symbol} {name:<24} {:<32} {}",
                r.detail,
                style(format!("{}ms", r.duration_ms)).dim()
            ));
            if !r.ok {
                if let Some(diag) = &r.diagnostics {
                    out.push(format!("   {} {diag}", style("diag:").yellow()));
                }
            }
        }

        let (passed, total) = self.required_summary();
        let label = if passed == total {
            style("Summary:").green()
        } else if passed * 2 >= total {
            style("Summary:").yellow()
        } else {
            style("Summary:").red()
        };
        out.push(String::new());
        out.push(format!("{label} {passed}/{total} passed in {}ms", self.duration_ms));

        if passed != total {
            out.push(style("Failures:").red().to_string());
            for r in self.failures() {
                out.push(format!(" - {}: {}", r.name, r.detail));
            }
            for hint in self.hints() {
                out.push(format!("  {hint}"));
            }
        }
        out.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

pub struct SmokeOptions {
    pub agent_port: Option<u16>,
    pub agent_sidecar_port: Option<u16>,
    pub workflow_sidecar_port: Option<u16>,
    pub wait_secs: u64,
    pub skip_optional: bool,
}

/// Run the suite and print the report. Returns the process exit code.
pub async fn run(settings: &Settings, opts: SmokeOptions, json: bool) -> Result<i32> {
    let started = Instant::now();
    let (agent_sidecar_port, workflow_sidecar_port, discovered) =
        resolve_ports(opts.agent_sidecar_port, opts.workflow_sidecar_port).await;

    let mut warnings = Vec::new();
    if agent_sidecar_port.is_none() {
        warnings.push(format!(
            "could not determine {AGENT_APP_ID} sidecar port (attempted discovery). Override with AGENT_SIDECAR_PORT."
        ));
    }
    if workflow_sidecar_port.is_none() {
        warnings.push(format!(
            "could not determine {WORKFLOW_APP_ID} sidecar port. Override with WORKFLOW_SIDECAR_PORT."
        ));
    }

    let targets = SmokeTargets::new(
        settings,
        opts.agent_port.unwrap_or(settings.agent_http_port),
        agent_sidecar_port,
        workflow_sidecar_port,
        !opts.skip_optional,
    );

    if opts.wait_secs > 0 && !wait_for_agent(&targets.agent_url, Duration::from_secs(opts.wait_secs)).await {
        warnings.push(format!("agent shell not healthy after {}s", opts.wait_secs));
    }

    let results = run_checks(&targets).instrument(traced_span("smoke")).await;
    let report = SmokeReport {
        discovered,
        warnings,
        results,
        duration_ms: started.elapsed().as_millis() as u64,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }

    let (passed, total) = report.required_summary();
    tracing::info!(passed, total, "smoke run finished");
    Ok(report.exit_code())
}

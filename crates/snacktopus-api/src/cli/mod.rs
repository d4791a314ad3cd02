//! CLI command definitions for the `snacktopus` binary.
//!
//! Long-running services (`agent-shell`, `workflow-host`) and one-shot tools
//! (`send-event`, `smoke`, `seed-memory`, `secret`) live in one binary and
//! share settings, logging, and the sidecar client.

pub mod secret;
pub mod seed_memory;
pub mod send_event;
pub mod smoke;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operation Snacktopus: durable snack approvals over a Dapr sidecar.
#[derive(Parser)]
#[command(name = "snacktopus", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Settings file (defaults to $SNACKTOPUS_CONFIG or ./snacktopus.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent shell HTTP service.
    #[command(name = "agent-shell")]
    AgentShell {
        /// Listen port (defaults to the agent_http_port setting).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the workflow host with the Snacktopus workflows registered.
    #[command(name = "workflow-host")]
    WorkflowHost {
        /// Listen port (defaults to the workflow_http_port setting).
        #[arg(long)]
        port: Option<u16>,

        /// Keep everything in memory; nothing survives a restart.
        #[arg(long, conflicts_with = "local")]
        ephemeral: bool,

        /// Use SQLite for saga state and log published messages instead of
        /// talking to the sidecar.
        #[arg(long)]
        local: bool,
    },

    /// Raise an external event against a running workflow instance.
    #[command(name = "send-event")]
    SendEvent {
        #[command(subcommand)]
        event: SendEventCommand,

        /// Workflow host base URL. Without it the event goes through the
        /// local sidecar, invoking the `workflow_app_id` app.
        #[arg(long, global = true, value_name = "URL")]
        host_url: Option<String>,
    },

    /// Probe the running stack and report pass/fail per check.
    Smoke {
        /// Agent shell app port.
        #[arg(long, env = "AGENT_HTTP_PORT")]
        agent_port: Option<u16>,

        /// Agent shell sidecar HTTP port (discovered via `dapr list` if unset).
        #[arg(long, env = "AGENT_SIDECAR_PORT")]
        agent_sidecar_port: Option<u16>,

        /// Workflow host sidecar HTTP port (discovered via `dapr list` if unset).
        #[arg(long, env = "WORKFLOW_SIDECAR_PORT")]
        workflow_sidecar_port: Option<u16>,

        /// Wait up to this many seconds for the agent shell to come up.
        #[arg(long, default_value_t = 0)]
        wait_secs: u64,

        /// Skip the Ollama and Zipkin probes.
        #[arg(long)]
        skip_optional: bool,
    },

    /// Write baseline memory documents into the state store.
    #[command(name = "seed-memory")]
    SeedMemory {
        /// JSON file holding an array of {"key", "value"} documents.
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Write through the local sidecar instead of the SQLite store.
        #[arg(long)]
        via_sidecar: bool,
    },

    /// Look up secrets through the env and sidecar providers.
    Secret {
        #[command(subcommand)]
        action: SecretCommand,
    },
}

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Resolve a secret (values are masked by default).
    Get {
        /// Secret name, e.g. `ollama`.
        name: String,

        /// Show only this field.
        #[arg(long)]
        field: Option<String>,

        /// Print values in clear text.
        #[arg(long)]
        reveal: bool,

        /// Skip the sidecar's secret store.
        #[arg(long)]
        env_only: bool,
    },
}

#[derive(Subcommand)]
pub enum SendEventCommand {
    /// Send a human approval decision (`humanApproval`).
    Human {
        /// Workflow instance ID.
        instance_id: String,

        /// approved, rejected, or timeout.
        #[arg(long, default_value = "approved")]
        verdict: String,

        /// Free-form reviewer notes.
        #[arg(long)]
        notes: Option<String>,
    },

    /// Send an arbitrary event with a JSON payload.
    Raw {
        /// Workflow instance ID.
        instance_id: String,

        /// Event name.
        event_name: String,

        /// JSON payload (defaults to null).
        #[arg(long)]
        data: Option<String>,
    },
}

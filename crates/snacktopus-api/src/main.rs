//! Snacktopus CLI and service entry point.
//!
//! Binary name: `snacktopus`
//!
//! Parses CLI arguments, sets up tracing and settings, then either runs one of
//! the HTTP services (agent shell, workflow host) or a one-shot tool.

mod cli;
mod http;
mod state;

use clap::Parser;
use console::style;

use cli::{Cli, Commands, SecretCommand, SendEventCommand};
use state::{AppState, HostMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,snacktopus=debug",
        _ => "trace",
    };
    if let Err(err) = snacktopus_observe::tracing_setup::init_tracing(cli.otel, filter) {
        eprintln!("tracing already initialized: {err}");
    }

    let result = run(cli).await;
    snacktopus_observe::tracing_setup::shutdown_tracing();

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => Err(err),
    }
}

/// Dispatch a parsed command. Returns the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let settings = snacktopus_infra::config::load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::AgentShell { port } => {
            let addr = format!("0.0.0.0:{}", port.unwrap_or(settings.agent_http_port));
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!("  {} Agent shell listening on {}", style("⚡").bold(), style(&addr).cyan());
            }
            tracing::info!(addr = %addr, "agent shell started");

            axum::serve(listener, http::agent_shell::build_router())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            tracing::info!("agent shell stopped");
        }

        Commands::WorkflowHost { port, ephemeral, local } => {
            let mode = if ephemeral {
                HostMode::Ephemeral
            } else if local {
                HostMode::Local
            } else {
                HostMode::Sidecar
            };
            let state = AppState::init(&settings, mode).await?;
            let resumed = state.runtime.start().await?;

            let addr = format!("0.0.0.0:{}", port.unwrap_or(settings.workflow_http_port));
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} Workflow host listening on {} ({:?} mode, {} instance(s) resumed)",
                    style("⚡").bold(),
                    style(&addr).cyan(),
                    mode,
                    resumed,
                );
            }

            let runtime = state.runtime.clone();
            axum::serve(listener, http::workflow_host::build_router(state))
                .with_graceful_shutdown(async move { runtime.wait_for_shutdown(shutdown_signal()).await })
                .await?;
            tracing::info!("workflow host stopped");
        }

        Commands::SendEvent { event, host_url } => {
            let client = cli::send_event::target_client(&settings, host_url.as_deref());
            match event {
                SendEventCommand::Human {
                    instance_id,
                    verdict,
                    notes,
                } => {
                    cli::send_event::send_human(&client, &instance_id, &verdict, notes, cli.json).await?;
                }
                SendEventCommand::Raw {
                    instance_id,
                    event_name,
                    data,
                } => {
                    let payload = cli::send_event::raw_payload(data.as_deref())?;
                    cli::send_event::send_event(&client, &instance_id, &event_name, &payload, cli.json).await?;
                }
            }
        }

        Commands::Smoke {
            agent_port,
            agent_sidecar_port,
            workflow_sidecar_port,
            wait_secs,
            skip_optional,
        } => {
            let opts = cli::smoke::SmokeOptions {
                agent_port,
                agent_sidecar_port,
                workflow_sidecar_port,
                wait_secs,
                skip_optional,
            };
            return cli::smoke::run(&settings, opts, cli.json).await;
        }

        Commands::SeedMemory { file, via_sidecar } => {
            cli::seed_memory::run(&settings, file.as_deref(), via_sidecar, cli.json).await?;
        }

        Commands::Secret { action } => match action {
            SecretCommand::Get {
                name,
                field,
                reveal,
                env_only,
            } => {
                let service = cli::secret::secret_service(&settings, env_only);
                cli::secret::get_secret(&service, &name, field.as_deref(), reveal, cli.json).await?;
            }
        },
    }

    Ok(0)
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

//! Application state wiring the workflow runtime to its stores.
//!
//! `AppState` pins the runtime and the snack saga's ports to concrete infra
//! implementations. Three layouts are supported:
//! - ephemeral: everything in memory, nothing survives a restart
//! - local: SQLite for instances and saga state, publishing is only logged
//! - sidecar (default): SQLite for instances, the Dapr sidecar for saga
//!   state and pub/sub

use std::sync::Arc;
use std::time::Duration;

use snacktopus_core::event::EventBus;
use snacktopus_core::pubsub::{DynEventPublisher, InMemoryPublisher};
use snacktopus_core::repository::instance::DynInstanceRepository;
use snacktopus_core::repository::memory::InMemoryInstanceRepository;
use snacktopus_core::storage::state_store::{DynStateStore, InMemoryStateStore};
use snacktopus_core::workflow::WorkflowRegistry;
use snacktopus_core::workflow::WorkflowRuntime;
use snacktopus_core::workflow::snacktopus::{SnacktopusServices, register_snacktopus};
use snacktopus_infra::dapr::{DaprPublisher, DaprStateStore, SidecarClient};
use snacktopus_infra::sqlite::instance::SqliteInstanceRepository;
use snacktopus_infra::sqlite::pool::DatabasePool;
use snacktopus_infra::sqlite::state::SqliteStateStore;
use snacktopus_types::config::Settings;

/// Where the workflow host keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    Ephemeral,
    Local,
    Sidecar,
}

/// Shared state of the workflow host's HTTP API.
#[derive(Clone)]
pub struct AppState {
    pub runtime: WorkflowRuntime,
    /// Workflow component name accepted in API paths.
    pub workflow_component: String,
}

impl AppState {
    /// Build the runtime for `mode` with both Snacktopus workflows registered.
    pub async fn init(settings: &Settings, mode: HostMode) -> anyhow::Result<Self> {
        let approval_timeout = Duration::from_secs(settings.approval_timeout_secs);

        let (repository, state_store, publisher): (DynInstanceRepository, DynStateStore, DynEventPublisher) =
            match mode {
                HostMode::Ephemeral => (
                    Arc::new(InMemoryInstanceRepository::new()),
                    Arc::new(InMemoryStateStore::new()),
                    Arc::new(InMemoryPublisher::new()),
                ),
                HostMode::Local => {
                    let pool = open_pool(settings).await?;
                    (
                        Arc::new(SqliteInstanceRepository::new(pool.clone())),
                        Arc::new(SqliteStateStore::new(pool)),
                        Arc::new(InMemoryPublisher::new()),
                    )
                }
                HostMode::Sidecar => {
                    let pool = open_pool(settings).await?;
                    let client = Arc::new(SidecarClient::for_port(settings.dapr_http_port));
                    (
                        Arc::new(SqliteInstanceRepository::new(pool)),
                        Arc::new(DaprStateStore::new(client.clone(), settings.state_store.clone())),
                        Arc::new(DaprPublisher::new(client, settings.pubsub.clone())),
                    )
                }
            };

        tracing::info!(?mode, "initializing workflow host");
        Self::with_parts(
            repository,
            SnacktopusServices {
                state_store,
                publisher,
                approval_timeout,
            },
            settings.workflow_component.clone(),
        )
    }

    /// Build state from already constructed ports.
    pub fn with_parts(
        repository: DynInstanceRepository,
        services: SnacktopusServices,
        workflow_component: String,
    ) -> anyhow::Result<Self> {
        let mut registry = WorkflowRegistry::new();
        register_snacktopus(&mut registry, services)?;
        let runtime = WorkflowRuntime::new(registry, repository, EventBus::default());
        Ok(Self {
            runtime,
            workflow_component,
        })
    }

    /// In-memory state with the default component name, for tests.
    #[cfg(test)]
    pub fn ephemeral() -> Self {
        Self::with_parts(
            Arc::new(InMemoryInstanceRepository::new()),
            SnacktopusServices {
                state_store: Arc::new(InMemoryStateStore::new()),
                publisher: Arc::new(InMemoryPublisher::new()),
                approval_timeout: Duration::from_secs(30),
            },
            "dapr".to_string(),
        )
        .expect("built-in workflows register")
    }
}

/// Open the SQLite store named by the settings (or the data-dir default).
pub async fn open_pool(settings: &Settings) -> anyhow::Result<DatabasePool> {
    Ok(DatabasePool::open(settings.database_url.as_deref()).await?)
}

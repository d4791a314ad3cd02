//! `seed-memory`: write baseline session memory documents into the state store.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::json;
use tracing::Instrument;

use snacktopus_core::storage::state_store::{DynStateStore, StateStoreDyn};
use snacktopus_infra::dapr::{DaprStateStore, SidecarClient};
use snacktopus_infra::sqlite::state::SqliteStateStore;
use snacktopus_observe::telemetry::traced_span;
use snacktopus_types::config::Settings;
use snacktopus_types::sidecar::StateEntry;

use crate::state::open_pool;

pub const BASELINE_KEY: &str = "snacktopus:memory:baseline";

/// The document written when no `--file` is given.
pub fn baseline_documents() -> Vec<StateEntry> {
    vec![StateEntry {
        key: BASELINE_KEY.to_string(),
        value: json!({
            "kind": "session_memory",
            "version": 1,
            "facts": [
                "Snack requests need a human approval before dispatch.",
                "Approvals arrive as the humanApproval event."
            ],
            "seeded_at": chrono::Utc::now().to_rfc3339(),
        }),
    }]
}

/// Read a JSON array of `{"key", "value"}` documents.
pub async fn load_documents(path: &Path) -> Result<Vec<StateEntry>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let docs: Vec<StateEntry> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of {{\"key\", \"value\"}} documents", path.display()))?;

    if let Some(pos) = docs.iter().position(|d| d.key.trim().is_empty()) {
        bail!("document #{pos} in {} has an empty key", path.display());
    }
    Ok(docs)
}

/// Save `docs` in one batch and return how many were written.
pub async fn seed(store: &dyn StateStoreDyn, docs: &[StateEntry]) -> Result<usize> {
    store
        .save_boxed(docs)
        .instrument(traced_span("seed_memory"))
        .await
        .context("failed to write memory documents")?;
    Ok(docs.len())
}

async fn open_store(settings: &Settings, via_sidecar: bool) -> Result<DynStateStore> {
    if via_sidecar {
        let client = Arc::new(SidecarClient::for_port(settings.dapr_http_port));
        return Ok(Arc::new(DaprStateStore::new(client, settings.state_store.clone())));
    }
    let pool = open_pool(settings).await?;
    Ok(Arc::new(SqliteStateStore::new(pool)))
}

pub async fn run(settings: &Settings, file: Option<&Path>, via_sidecar: bool, json: bool) -> Result<()> {
    let docs = match file {
        Some(path) => load_documents(path).await?,
        None => baseline_documents(),
    };
    let store = open_store(settings, via_sidecar).await?;
    let written = seed(store.as_ref(), &docs).await?;

    let target = if via_sidecar {
        format!("sidecar state store '{}'", settings.state_store)
    } else {
        "local SQLite store".to_string()
    };
    tracing::info!(written, target = %target, "seeded memory documents");

    if json {
        let keys: Vec<&str> = docs.iter().map(|d| d.key.as_str()).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "written": written, "target": target, "keys": keys }))?
        );
    } else {
        println!(
            "  {} Seeded {} memory document(s) into {}",
            style("ok").green(),
            style(written).bold(),
            style(&target).cyan(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snacktopus_core::storage::state_store::InMemoryStateStore;
    use tempfile::TempDir;

    fn local_settings(dir: &TempDir) -> Settings {
        Settings {
            database_url: Some(format!("sqlite://{}", dir.path().join("memory.db").display())),
            ..Settings::default()
        }
    }

    #[test]
    fn baseline_is_a_single_document() {
        let docs = baseline_documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key, BASELINE_KEY);
        assert_eq!(docs[0].value["kind"], "session_memory");
    }

    #[tokio::test]
    async fn load_documents_reads_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docs.json");
        tokio::fs::write(
            &path,
            r#"[{"key":"memory:a","value":{"n":1}},{"key":"memory:b","value":"plain"}]"#,
        )
        .await
        .unwrap();

        let docs = load_documents(&path).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].value, json!("plain"));
    }

    #[tokio::test]
    async fn load_documents_rejects_empty_keys_and_bad_shapes() {
        let dir = TempDir::new().unwrap();
        let empty_key = dir.path().join("empty.json");
        tokio::fs::write(&empty_key, r#"[{"key":" ","value":1}]"#).await.unwrap();
        let err = load_documents(&empty_key).await.unwrap_err();
        assert!(err.to_string().contains("empty key"));

        let not_array = dir.path().join("object.json");
        tokio::fs::write(&not_array, r#"{"key":"a","value":1}"#).await.unwrap();
        assert!(load_documents(&not_array).await.is_err());

        assert!(load_documents(&dir.path().join("missing.json")).await.is_err());
    }

    #[tokio::test]
    async fn seed_writes_every_document() {
        let store = InMemoryStateStore::new();
        let docs = vec![
            StateEntry {
                key: "memory:a".into(),
                value: json!(1),
            },
            StateEntry {
                key: "memory:b".into(),
                value: json!(2),
            },
        ];
        assert_eq!(seed(&store, &docs).await.unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn run_seeds_local_sqlite_store() {
        let dir = TempDir::new().unwrap();
        let settings = local_settings(&dir);
        run(&settings, None, false, true).await.unwrap();

        let store = open_store(&settings, false).await.unwrap();
        let value = store.get_boxed(BASELINE_KEY).await.unwrap().unwrap();
        assert_eq!(value["version"], 1);
    }
}

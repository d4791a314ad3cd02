//! Key-value state store trait.
//!
//! Stores arbitrary JSON values keyed by string. Backed by the sidecar's
//! state store component in production, by SQLite for local tooling, and by
//! [`InMemoryStateStore`] in tests and ephemeral hosts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use snacktopus_types::error::RepositoryError;
use snacktopus_types::sidecar::StateEntry;

/// Trait for key-value persistent state.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait StateStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Upsert a batch of entries.
    fn save(
        &self,
        entries: &[StateEntry],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a key. No-op if the key does not exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`StateStore`] with boxed futures.
pub trait StateStoreDyn: Send + Sync {
    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFut<'a, Option<serde_json::Value>>;

    fn save_boxed<'a>(&'a self, entries: &'a [StateEntry]) -> BoxFut<'a, ()>;

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFut<'a, ()>;
}

impl<T: StateStore> StateStoreDyn for T {
    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFut<'a, Option<serde_json::Value>> {
        Box::pin(self.get(key))
    }

    fn save_boxed<'a>(&'a self, entries: &'a [StateEntry]) -> BoxFut<'a, ()> {
        Box::pin(self.save(entries))
    }

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.delete(key))
    }
}

pub type DynStateStore = Arc<dyn StateStoreDyn>;

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let entries = self.entries.lock().map_err(|_| RepositoryError::Connection)?;
        Ok(entries.get(key).cloned())
    }

    async fn save(&self, batch: &[StateEntry]) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().map_err(|_| RepositoryError::Connection)?;
        for entry in batch {
            entries.insert(entry.key.clone(), entry.value.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().map_err(|_| RepositoryError::Connection)?;
        entries.remove(key);
        Ok(())
    }
}

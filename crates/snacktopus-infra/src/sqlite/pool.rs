//! SQLite store for workflow instances and saga state.
//!
//! The host checkpoints from many instance tasks at once while replays and
//! status queries read concurrently, so the store is opened as two pools over
//! one WAL-mode file: a single writer connection and a handful of read-only
//! readers. [`DatabasePool::open`] is the entry point the binary uses; it
//! resolves the data-dir default and prepares the file's directory.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

const DATABASE_FILE: &str = "snacktopus.db";
const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to migrate database: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Writer and reader pools over the same SQLite file.
#[derive(Clone, Debug)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    /// Exactly one connection; SQLite serializes writers anyway.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open `database_url` (or [`default_database_url`] when None), creating
    /// the file's parent directory first.
    pub async fn open(database_url: Option<&str>) -> Result<Self, PoolError> {
        let url = database_url.map_or_else(default_database_url, str::to_string);

        if let Some(dir) = database_file(&url).as_deref().and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await.map_err(|source| PoolError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        tracing::debug!(url = %url, "opening workflow store");
        Self::new(&url).await
    }

    /// Connect both pools and bring the schema up to date.
    pub async fn new(database_url: &str) -> Result<Self, PoolError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        // Readers are read-only, so the tables must exist before they connect.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

/// `$SNACKTOPUS_DATA_DIR/snacktopus.db`, or `~/.snacktopus/snacktopus.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("SNACKTOPUS_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.snacktopus")
    });
    format!("sqlite://{data_dir}/{DATABASE_FILE}")
}

/// File path named by a `sqlite:` URL, without query parameters.
///
/// None for in-memory databases and non-SQLite URLs.
pub fn database_file(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_for(path: &Path) -> String {
        format!("sqlite://{}?mode=rwc", path.display())
    }

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&url_for(&dir.path().join("test.db"))).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            table_names,
            vec!["state_entries", "workflow_history", "workflow_inbox", "workflow_instances"]
        );
    }

    #[tokio::test]
    async fn test_writer_is_wal_with_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&url_for(&dir.path().join("pragmas.db"))).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let (fk,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_reader_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&url_for(&dir.path().join("ro.db"))).await.unwrap();

        let result = sqlx::query("DELETE FROM workflow_instances")
            .execute(&pool.reader)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_creates_nested_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("host").join(DATABASE_FILE);
        let url = format!("sqlite://{}", db_path.display());

        let pool = DatabasePool::open(Some(&url)).await.unwrap();
        assert!(db_path.exists());
        pool.close().await;

        // Reopening runs the migrations again without complaint.
        DatabasePool::open(Some(&url)).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_reports_unusable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let url = format!("sqlite://{}", blocker.join(DATABASE_FILE).display());

        let err = DatabasePool::open(Some(&url)).await.unwrap_err();
        assert!(matches!(err, PoolError::CreateDir { .. }));
    }

    #[test]
    fn test_database_file_from_url() {
        assert_eq!(
            database_file("sqlite:///var/lib/snacktopus/snacktopus.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/snacktopus/snacktopus.db"))
        );
        assert_eq!(database_file("sqlite:local.db"), Some(PathBuf::from("local.db")));
        assert_eq!(database_file("sqlite::memory:"), None);
        assert_eq!(database_file("postgres://db/snacks"), None);
    }

    #[test]
    fn test_default_database_url() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(database_file(&url).unwrap().ends_with(DATABASE_FILE));
    }
}

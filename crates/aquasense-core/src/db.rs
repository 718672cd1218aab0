//! `SQLite` connection setup for the document store, and the shared clock.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Runtime and dashboards write the same file from separate processes.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const FILE_POOL_SIZE: u32 = 5;

/// Failures opening or migrating a store.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Cannot prepare {path}: {reason}")]
    Prepare { path: PathBuf, reason: String },

    #[error("Cannot connect to {location}: {reason}")]
    Connect { location: String, reason: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Where a document store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Private to one pool; gone once the pool closes.
    Memory,
}

impl StoreLocation {
    pub fn file(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }

    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory => "in-memory store".to_string(),
        }
    }

    fn connect_error(&self, e: &sqlx::Error) -> DatabaseError {
        DatabaseError::Connect {
            location: self.describe(),
            reason: e.to_string(),
        }
    }

    fn options(&self) -> SqliteConnectOptions {
        let base = match self {
            Self::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .busy_timeout(BUSY_TIMEOUT),
            Self::Memory => SqliteConnectOptions::new().in_memory(true),
        };
        base.journal_mode(SqliteJournalMode::Wal).foreign_keys(true)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        match self {
            Self::File(_) => SqlitePoolOptions::new().max_connections(FILE_POOL_SIZE),
            // Every new connection to `:memory:` is a fresh empty database,
            // so the single connection must never be recycled.
            Self::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
    }
}

/// Connect a pool to `location`, creating the file and its directory when
/// missing.
pub async fn connect(location: &StoreLocation) -> Result<Pool<Sqlite>, DatabaseError> {
    if let StoreLocation::File(path) = location
        && let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Prepare {
            path: parent.to_path_buf(),
            reason: e.to_string(),
        })?;
    }

    let pool = location
        .pool_options()
        .connect_with(location.options())
        .await
        .map_err(|e| location.connect_error(&e))?;

    if let StoreLocation::File(path) = location {
        info!(path = %path.display(), "Store file opened");
    }
    Ok(pool)
}

/// Current wall-clock time in unix seconds.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_creates_missing_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ponds").join("aquasense.db");
        let pool = connect(&StoreLocation::file(&path)).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn memory_store_keeps_its_data_across_queries() {
        let pool = connect(&StoreLocation::Memory).await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn clock_is_past_2024() {
        assert!(unix_timestamp() > 1_704_067_200);
    }
}

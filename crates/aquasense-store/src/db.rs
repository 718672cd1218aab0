//! Document database handle.

use std::path::Path;

use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;
use tracing::{debug, info};

use aquasense_core::db::{self as core_db, DatabaseError, StoreLocation};

use crate::listen::Change;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Unchecked handle on the document store.
///
/// Everything here bypasses the access rules; dashboards and the runtime go
/// through [`crate::SecuredStore`].
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<Change>,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let pool = core_db::connect(&StoreLocation::file(path)).await?;
        let db = Self::from_pool(pool);
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let pool = core_db::connect(&StoreLocation::Memory).await?;
        let db = Self::from_pool(pool);
        db.run_migrations().await?;
        Ok(db)
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("Document store migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    pub(crate) fn publish(&self, changes: Vec<Change>) {
        for change in changes {
            // No receivers is fine: nobody is listening.
            if self.changes.send(change).is_err() {
                break;
            }
        }
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Document store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().await;
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn open_file_runs_migrations_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        let db = Database::open(&path).await.unwrap();
        db.close().await;
        assert!(Database::open(&path).await.is_ok());
    }
}

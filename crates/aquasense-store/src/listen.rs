//! Live query listeners.

use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use aquasense_core::{CollectionPath, DocPath};

use crate::document::Document;
use crate::error::StoreError;
use crate::queries::fetch_query;
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed change to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: DocPath,
    pub parent: CollectionPath,
    pub kind: ChangeKind,
}

impl Change {
    pub(crate) fn new(path: DocPath, kind: ChangeKind) -> Self {
        let parent = path.parent();
        Self { path, parent, kind }
    }
}

/// Yields a fresh snapshot of a query each time its collection changes.
///
/// Only sees writes made through the same [`crate::Database`] handle (the
/// change feed is in-process). Writers in other processes are picked up by
/// the caller's periodic refresh.
pub struct Listener {
    pool: Pool<Sqlite>,
    query: Query,
    changes: broadcast::Receiver<Change>,
}

impl Listener {
    pub(crate) const fn new(
        pool: Pool<Sqlite>,
        query: Query,
        changes: broadcast::Receiver<Change>,
    ) -> Self {
        Self {
            pool,
            query,
            changes,
        }
    }

    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Wait for the next change to the collection and return the new snapshot.
    ///
    /// Fails with a transient error once the store is closed.
    pub async fn next(&mut self) -> Result<Vec<Document>, StoreError> {
        loop {
            match self.changes.recv().await {
                Ok(change) if change.parent == self.query.collection => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, collection = %self.query.collection, "Listener lagged, re-querying");
                    break;
                }
                Err(RecvError::Closed) => {
                    return Err(StoreError::Transient("change feed closed".to_string()));
                }
            }
        }
        self.drain();
        debug!(collection = %self.query.collection, "Listener refreshing snapshot");
        self.snapshot().await
    }

    /// Re-run the query without waiting for a change.
    pub async fn snapshot(&self) -> Result<Vec<Document>, StoreError> {
        fetch_query(&self.pool, &self.query).await
    }

    /// Collapse changes already queued so one batch yields one snapshot.
    fn drain(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

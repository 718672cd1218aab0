//! Document reads and writes.

use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

use aquasense_core::db::unix_timestamp;
use aquasense_core::{DocPath, Operation};

use crate::db::Database;
use crate::document::{Document, DocumentRow, Write, resolve_server_timestamps};
use crate::error::StoreError;
use crate::listen::{Change, ChangeKind, Listener};
use crate::query::{FilterOp, Query, json_path};

const DOC_COLUMNS: &str = "SELECT seq, path, data, create_time, update_time FROM documents";

/// Result of a transaction closure.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome<T> {
    /// Write this data (create or overwrite) and return the value.
    Set(Value, T),
    /// Delete the document and return the value.
    Delete(T),
    /// Leave the document untouched.
    Keep(T),
}

fn no_check(
    _: Operation,
    _: &DocPath,
    _: Option<&Value>,
    _: Option<&Value>,
) -> Result<(), StoreError> {
    Ok(())
}

pub(crate) async fn fetch_doc<'c, E>(executor: E, path: &DocPath) -> Result<Option<Document>, StoreError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, DocumentRow>(&format!("{DOC_COLUMNS} WHERE path = ?"))
        .bind(path.as_str())
        .fetch_optional(executor)
        .await?;
    row.map(Document::try_from).transpose()
}

fn push_scalar(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        }
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        // Rejected by Query::validate.
        Value::Null | Value::Array(_) | Value::Object(_) => {
            builder.push("NULL");
        }
    }
}

pub(crate) async fn fetch_query<'c, E>(executor: E, query: &Query) -> Result<Vec<Document>, StoreError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    query.validate()?;

    let mut builder = QueryBuilder::<Sqlite>::new(DOC_COLUMNS);
    builder.push(" WHERE parent = ");
    builder.push_bind(query.collection.as_str().to_string());

    if let Some(seq) = query.after_seq {
        builder.push(" AND seq > ");
        builder.push_bind(seq);
    }

    for filter in &query.filters {
        builder.push(" AND json_extract(data, ");
        builder.push_bind(json_path(&filter.field)?);
        builder.push(")");
        if filter.value.is_null() {
            builder.push(if matches!(filter.op, FilterOp::Eq) {
                " IS NULL"
            } else {
                " IS NOT NULL"
            });
            continue;
        }
        builder.push(" ");
        builder.push(filter.op.sql());
        builder.push(" ");
        push_scalar(&mut builder, &filter.value);
    }

    builder.push(" ORDER BY ");
    if let Some((field, direction)) = &query.order {
        builder.push("json_extract(data, ");
        builder.push_bind(json_path(field)?);
        builder.push(") ");
        builder.push(direction.sql());
        builder.push(", ");
    }
    builder.push("seq ASC");

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(limit));
    }

    let rows = builder
        .build_query_as::<DocumentRow>()
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(Document::try_from).collect()
}

/// Resolved form of one write: the operation the access rules see and the
/// document data after the write (`None` for a delete).
struct Planned {
    operation: Operation,
    existing: Option<Document>,
    incoming: Option<Value>,
}

fn require_object(path: &DocPath, data: &Value) -> Result<(), StoreError> {
    if data.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!(
            "data for {path} must be an object"
        )))
    }
}

async fn plan(conn: &mut SqliteConnection, write: &Write, now: i64) -> Result<Planned, StoreError> {
    let path = write.path();
    let existing = fetch_doc(&mut *conn, path).await?;

    let (operation, incoming) = match write {
        Write::Create { data, .. } => {
            if existing.is_some() {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
            let mut data = data.clone();
            require_object(path, &data)?;
            resolve_server_timestamps(&mut data, now);
            (Operation::Create, Some(data))
        }
        Write::Set { data, .. } => {
            let mut data = data.clone();
            require_object(path, &data)?;
            resolve_server_timestamps(&mut data, now);
            let operation = if existing.is_some() {
                Operation::Update
            } else {
                Operation::Create
            };
            (operation, Some(data))
        }
        Write::Update { patch, .. } => {
            let Some(current) = &existing else {
                return Err(StoreError::NotFound(path.to_string()));
            };
            let mut merged: Map<String, Value> =
                current.data.as_object().cloned().unwrap_or_default();
            for (key, value) in patch {
                let mut value = value.clone();
                resolve_server_timestamps(&mut value, now);
                merged.insert(key.clone(), value);
            }
            (Operation::Update, Some(Value::Object(merged)))
        }
        Write::Delete { .. } => (Operation::Delete, None),
    };

    Ok(Planned {
        operation,
        existing,
        incoming,
    })
}

async fn apply(
    conn: &mut SqliteConnection,
    path: &DocPath,
    planned: Planned,
    now: i64,
) -> Result<Option<Change>, StoreError> {
    let kind = match (&planned.existing, planned.incoming) {
        (None, None) => return Ok(None),
        (Some(_), None) => {
            sqlx::query("DELETE FROM documents WHERE path = ?")
                .bind(path.as_str())
                .execute(&mut *conn)
                .await?;
            ChangeKind::Deleted
        }
        (None, Some(data)) => {
            sqlx::query(
                "INSERT INTO documents (path, parent, data, create_time, update_time) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(path.as_str())
            .bind(path.parent().as_str())
            .bind(serde_json::to_string(&data)?)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            ChangeKind::Created
        }
        (Some(_), Some(data)) => {
            sqlx::query("UPDATE documents SET data = ?, update_time = ? WHERE path = ?")
                .bind(serde_json::to_string(&data)?)
                .bind(now)
                .bind(path.as_str())
                .execute(&mut *conn)
                .await?;
            ChangeKind::Updated
        }
    };
    Ok(Some(Change::new(path.clone(), kind)))
}

/// Take the write lock before reading so concurrent writers wait on the
/// busy timeout instead of failing at commit.
async fn lock_for_write(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query("UPDATE documents SET seq = seq WHERE 0")
        .execute(conn)
        .await?;
    Ok(())
}

impl Database {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a document by path.
    pub async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        fetch_doc(self.pool(), path).await
    }

    /// Run a collection query.
    pub async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        fetch_query(self.pool(), query).await
    }

    /// Snapshot of a query plus a listener for later snapshots.
    pub async fn listen(&self, query: Query) -> Result<(Vec<Document>, Listener), StoreError> {
        // Subscribe before reading so no change between the two is missed.
        let changes = self.subscribe();
        let snapshot = fetch_query(self.pool(), &query).await?;
        Ok((snapshot, Listener::new(self.pool().clone(), query, changes)))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create a document; fails if it exists.
    pub async fn create(&self, path: &DocPath, data: Value) -> Result<(), StoreError> {
        self.commit(vec![Write::Create {
            path: path.clone(),
            data,
        }])
        .await
    }

    /// Create or overwrite a document.
    pub async fn set(&self, path: &DocPath, data: Value) -> Result<(), StoreError> {
        self.commit(vec![Write::Set {
            path: path.clone(),
            data,
        }])
        .await
    }

    /// Merge top-level fields into an existing document.
    pub async fn update(&self, path: &DocPath, patch: Map<String, Value>) -> Result<(), StoreError> {
        self.commit(vec![Write::Update {
            path: path.clone(),
            patch,
        }])
        .await
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.commit(vec![Write::Delete { path: path.clone() }]).await
    }

    /// Delete a document and every document nested below it.
    pub async fn delete_tree(&self, path: &DocPath) -> Result<u64, StoreError> {
        self.delete_tree_checked(path, no_check).await
    }

    /// Apply a batch of writes atomically.
    pub async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        self.commit_checked(writes, no_check).await
    }

    /// Read-modify-write one document inside a transaction.
    pub async fn transact<T, F>(&self, path: &DocPath, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Option<&Document>) -> Result<TxOutcome<T>, StoreError>,
    {
        self.transact_checked(path, f, no_check).await
    }

    /// Like [`Self::transact`], with the result of `guard` read inside the
    /// same transaction and handed to `f`.
    pub async fn transact_guarded<T, F>(&self, guard: &Query, path: &DocPath, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&[Document], Option<&Document>) -> Result<TxOutcome<T>, StoreError>,
    {
        self.run_transaction(Some(guard), path, f, no_check).await
    }

    // =========================================================================
    // Checked primitives
    // =========================================================================

    /// Apply a batch, calling `check` on every write with the stored and
    /// resulting data before anything is written.
    pub(crate) async fn commit_checked<C>(&self, writes: Vec<Write>, check: C) -> Result<(), StoreError>
    where
        C: Fn(Operation, &DocPath, Option<&Value>, Option<&Value>) -> Result<(), StoreError>,
    {
        if writes.is_empty() {
            return Ok(());
        }
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;
        lock_for_write(&mut tx).await?;

        let mut changes = Vec::with_capacity(writes.len());
        for write in &writes {
            let planned = plan(&mut tx, write, now).await?;
            check(
                planned.operation,
                write.path(),
                planned.existing.as_ref().map(|d| &d.data),
                planned.incoming.as_ref(),
            )?;
            if let Some(change) = apply(&mut tx, write.path(), planned, now).await? {
                changes.push(change);
            }
        }

        tx.commit().await?;
        debug!(writes = writes.len(), changed = changes.len(), "Batch committed");
        self.publish(changes);
        Ok(())
    }

    pub(crate) async fn transact_checked<T, F, C>(
        &self,
        path: &DocPath,
        f: F,
        check: C,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(Option<&Document>) -> Result<TxOutcome<T>, StoreError>,
        C: Fn(Operation, &DocPath, Option<&Value>, Option<&Value>) -> Result<(), StoreError>,
    {
        self.run_transaction(None, path, |_, existing| f(existing), check)
            .await
    }

    async fn run_transaction<T, F, C>(
        &self,
        guard: Option<&Query>,
        path: &DocPath,
        f: F,
        check: C,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&[Document], Option<&Document>) -> Result<TxOutcome<T>, StoreError>,
        C: Fn(Operation, &DocPath, Option<&Value>, Option<&Value>) -> Result<(), StoreError>,
    {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;
        lock_for_write(&mut tx).await?;

        let guarded = match guard {
            Some(query) => fetch_query(&mut *tx, query).await?,
            None => Vec::new(),
        };
        let existing = fetch_doc(&mut *tx, path).await?;
        check(Operation::Get, path, existing.as_ref().map(|d| &d.data), None)?;

        let (planned, value) = match f(&guarded, existing.as_ref())? {
            TxOutcome::Keep(value) => return Ok(value),
            TxOutcome::Set(mut data, value) => {
                require_object(path, &data)?;
                resolve_server_timestamps(&mut data, now);
                let operation = if existing.is_some() {
                    Operation::Update
                } else {
                    Operation::Create
                };
                let planned = Planned {
                    operation,
                    existing,
                    incoming: Some(data),
                };
                (planned, value)
            }
            TxOutcome::Delete(value) => {
                let planned = Planned {
                    operation: Operation::Delete,
                    existing,
                    incoming: None,
                };
                (planned, value)
            }
        };

        check(
            planned.operation,
            path,
            planned.existing.as_ref().map(|d| &d.data),
            planned.incoming.as_ref(),
        )?;
        let change = apply(&mut tx, path, planned, now).await?;
        tx.commit().await?;
        self.publish(change.into_iter().collect());
        Ok(value)
    }

    pub(crate) async fn delete_tree_checked<C>(&self, path: &DocPath, check: C) -> Result<u64, StoreError>
    where
        C: Fn(Operation, &DocPath, Option<&Value>, Option<&Value>) -> Result<(), StoreError>,
    {
        let prefix = format!("{path}/");
        let prefix_len = i64::try_from(prefix.chars().count())
            .map_err(|_| StoreError::InvalidArgument(format!("path too long: {path}")))?;

        let mut tx = self.pool().begin().await?;
        lock_for_write(&mut tx).await?;

        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "{DOC_COLUMNS} WHERE path = ? OR substr(path, 1, ?) = ? ORDER BY seq"
        ))
        .bind(path.as_str())
        .bind(prefix_len)
        .bind(prefix.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let docs = rows
            .into_iter()
            .map(Document::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        for doc in &docs {
            check(Operation::Delete, &doc.path, Some(&doc.data), None)?;
        }

        let result = sqlx::query("DELETE FROM documents WHERE path = ? OR substr(path, 1, ?) = ?")
            .bind(path.as_str())
            .bind(prefix_len)
            .bind(prefix.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let changes = docs
            .into_iter()
            .map(|doc| Change::new(doc.path, ChangeKind::Deleted))
            .collect();
        self.publish(changes);
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::server_timestamp;
    use crate::query::Direction;
    use aquasense_core::paths::{self, Collection};
    use serde_json::json;

    async fn test_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn schedule(id: &str) -> DocPath {
        paths::doc("u1", Collection::Schedules, id).unwrap()
    }

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_then_get() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({"status": "pending"})).await.unwrap();

        let doc = db.get(&schedule("s1")).await.unwrap().unwrap();
        assert_eq!(doc.id(), "s1");
        assert_eq!(doc.data["status"], "pending");
        assert!(doc.seq > 0);
        assert!(db.get(&schedule("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({})).await.unwrap();
        let err = db.create(&schedule("s1"), json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn set_keeps_sequence_and_create_time() {
        let db = test_db().await;
        db.set(&schedule("s1"), json!({"v": 1})).await.unwrap();
        let first = db.get(&schedule("s1")).await.unwrap().unwrap();
        db.set(&schedule("s1"), json!({"v": 2})).await.unwrap();
        let second = db.get(&schedule("s1")).await.unwrap().unwrap();

        assert_eq!(first.seq, second.seq);
        assert_eq!(first.create_time, second.create_time);
        assert_eq!(second.data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn update_merges_and_requires_document() {
        let db = test_db().await;
        let err = db
            .update(&schedule("s1"), patch(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        db.create(&schedule("s1"), json!({"a": 1, "b": 2})).await.unwrap();
        db.update(&schedule("s1"), patch(json!({"b": 3, "c": 4})))
            .await
            .unwrap();
        let doc = db.get(&schedule("s1")).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn server_timestamps_are_resolved() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({"created_at": server_timestamp()}))
            .await
            .unwrap();
        let doc = db.get(&schedule("s1")).await.unwrap().unwrap();
        assert_eq!(doc.data["created_at"], json!(doc.create_time));
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let db = test_db().await;
        for (id, at, status) in [
            ("a", 30, "pending"),
            ("b", 10, "pending"),
            ("c", 20, "completed"),
            ("d", 5, "pending"),
        ] {
            db.create(&schedule(id), json!({"scheduled_at": at, "status": status}))
                .await
                .unwrap();
        }

        let coll = paths::collection("u1", Collection::Schedules).unwrap();
        let due = db
            .query(
                &Query::new(coll.clone())
                    .eq("status", "pending")
                    .filter("scheduled_at", FilterOp::Le, 10)
                    .order_by("scheduled_at", Direction::Asc),
            )
            .await
            .unwrap();
        let ids: Vec<_> = due.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["d", "b"]);

        let latest = db
            .query(&Query::new(coll).order_by("scheduled_at", Direction::Desc).limit(1))
            .await
            .unwrap();
        assert_eq!(latest[0].id(), "a");
    }

    #[tokio::test]
    async fn query_only_sees_direct_children() {
        let db = test_db().await;
        db.create(&paths::user("u1").unwrap(), json!({"role": "user"}))
            .await
            .unwrap();
        db.create(&schedule("s1"), json!({})).await.unwrap();

        let users = db.query(&Query::new(paths::users())).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id(), "u1");
    }

    #[tokio::test]
    async fn after_seq_skips_folded_documents() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({})).await.unwrap();
        let first = db.get(&schedule("s1")).await.unwrap().unwrap();
        db.create(&schedule("s2"), json!({})).await.unwrap();

        let coll = paths::collection("u1", Collection::Schedules).unwrap();
        let rest = db.query(&Query::new(coll).after_seq(first.seq)).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id(), "s2");
    }

    #[tokio::test]
    async fn null_filters_match_missing_fields() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({"repeat": "daily"})).await.unwrap();
        db.create(&schedule("s2"), json!({"repeat": null})).await.unwrap();

        let coll = paths::collection("u1", Collection::Schedules).unwrap();
        let once = db
            .query(&Query::new(coll).eq("repeat", Value::Null))
            .await
            .unwrap();
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].id(), "s2");
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({})).await.unwrap();

        let result = db
            .commit(vec![
                Write::Create {
                    path: schedule("s2"),
                    data: json!({}),
                },
                Write::Create {
                    path: schedule("s1"),
                    data: json!({}),
                },
            ])
            .await;
        assert!(result.is_err());
        assert!(db.get(&schedule("s2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transact_reads_and_writes_one_document() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({"n": 1})).await.unwrap();

        let previous = db
            .transact(&schedule("s1"), |doc| {
                let n = doc.and_then(|d| d.data["n"].as_i64()).unwrap_or(0);
                Ok(TxOutcome::Set(json!({"n": n + 1}), n))
            })
            .await
            .unwrap();
        assert_eq!(previous, 1);
        let doc = db.get(&schedule("s1")).await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 2);

        let kept = db
            .transact(&schedule("s1"), |_| Ok(TxOutcome::Keep("kept")))
            .await
            .unwrap();
        assert_eq!(kept, "kept");
    }

    #[tokio::test]
    async fn guarded_transaction_sees_the_guard_query() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({"status": "pending"})).await.unwrap();
        let pending = Query::new(paths::collection("u1", Collection::Schedules).unwrap())
            .eq("status", "pending");

        let written = db
            .transact_guarded(&pending, &schedule("s2"), |others, doc| {
                assert!(doc.is_none());
                if others.is_empty() {
                    Ok(TxOutcome::Set(json!({"status": "pending"}), true))
                } else {
                    Ok(TxOutcome::Keep(false))
                }
            })
            .await
            .unwrap();
        assert!(!written);
        assert!(db.get(&schedule("s2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn aborted_transaction_leaves_document() {
        let db = test_db().await;
        db.create(&schedule("s1"), json!({"n": 1})).await.unwrap();

        let result: Result<(), _> = db
            .transact(&schedule("s1"), |_| {
                Err(StoreError::Aborted("claimed elsewhere".into()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Aborted(_))));
        let doc = db.get(&schedule("s1")).await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 1);
    }

    #[tokio::test]
    async fn delete_tree_removes_nested_documents_only() {
        let db = test_db().await;
        db.create(&paths::user("u1").unwrap(), json!({})).await.unwrap();
        db.create(&paths::user("u10").unwrap(), json!({})).await.unwrap();
        db.create(&schedule("s1"), json!({})).await.unwrap();
        db.create(
            &paths::doc("u10", Collection::Schedules, "s1").unwrap(),
            json!({}),
        )
        .await
        .unwrap();

        let removed = db.delete_tree(&paths::user("u1").unwrap()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(db.get(&paths::user("u10").unwrap()).await.unwrap().is_some());
        assert!(
            db.get(&paths::doc("u10", Collection::Schedules, "s1").unwrap())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn delete_missing_document_is_ok() {
        let db = test_db().await;
        assert!(db.delete(&schedule("nope")).await.is_ok());
    }
}

//! Rule-checked access to the document store.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use aquasense_core::{AccessRequest, CollectionPath, DocPath, Operation, Principal, RuleEngine};

use crate::db::Database;
use crate::document::{Document, Write, encode};
use crate::error::StoreError;
use crate::listen::Listener;
use crate::queries::TxOutcome;
use crate::query::Query;

/// The store as seen by one principal. Every operation is evaluated against
/// the access rules before it touches the database.
#[derive(Clone)]
pub struct SecuredStore {
    db: Database,
    rules: Arc<RuleEngine>,
    principal: Principal,
}

impl SecuredStore {
    pub const fn new(db: Database, rules: Arc<RuleEngine>, principal: Principal) -> Self {
        Self {
            db,
            rules,
            principal,
        }
    }

    /// Store handle for the unauthenticated background runtime.
    pub const fn runtime(db: Database, rules: Arc<RuleEngine>) -> Self {
        Self::new(db, rules, Principal::Runtime)
    }

    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Same store and rules, acting for someone else.
    #[must_use]
    pub fn with_principal(&self, principal: Principal) -> Self {
        Self::new(self.db.clone(), Arc::clone(&self.rules), principal)
    }

    fn authorize(
        &self,
        operation: Operation,
        path: &str,
        existing: Option<&Value>,
        incoming: Option<&Value>,
    ) -> Result<(), StoreError> {
        let decision = self.rules.evaluate(&AccessRequest {
            principal: &self.principal,
            operation,
            path,
            existing,
            incoming,
        });
        if decision.is_allowed() {
            return Ok(());
        }
        warn!(
            principal = %self.principal,
            %operation,
            path,
            rule = decision.rule_id.as_deref().unwrap_or("none"),
            "Access denied"
        );
        Err(StoreError::PermissionDenied {
            principal: self.principal.to_string(),
            operation,
            path: path.to_string(),
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let doc = self.db.get(path).await?;
        self.authorize(
            Operation::Get,
            path.as_str(),
            doc.as_ref().map(|d| &d.data),
            None,
        )?;
        Ok(doc)
    }

    /// Get and decode a document.
    pub async fn get_as<T: DeserializeOwned>(&self, path: &DocPath) -> Result<Option<T>, StoreError> {
        self.get(path).await?.map(|doc| doc.decode()).transpose()
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.authorize_list(&query.collection)?;
        self.db.query(query).await
    }

    /// Run a query and decode every document.
    pub async fn query_as<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, StoreError> {
        self.query(query)
            .await?
            .iter()
            .map(Document::decode)
            .collect()
    }

    pub async fn listen(&self, query: Query) -> Result<(Vec<Document>, Listener), StoreError> {
        self.authorize_list(&query.collection)?;
        self.db.listen(query).await
    }

    fn authorize_list(&self, collection: &CollectionPath) -> Result<(), StoreError> {
        self.authorize(Operation::List, collection.as_str(), None, None)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn create<T: Serialize>(&self, path: &DocPath, value: &T) -> Result<(), StoreError> {
        self.commit(vec![Write::Create {
            path: path.clone(),
            data: encode(value)?,
        }])
        .await
    }

    pub async fn set<T: Serialize>(&self, path: &DocPath, value: &T) -> Result<(), StoreError> {
        self.commit(vec![Write::Set {
            path: path.clone(),
            data: encode(value)?,
        }])
        .await
    }

    pub async fn update(&self, path: &DocPath, patch: Map<String, Value>) -> Result<(), StoreError> {
        self.commit(vec![Write::Update {
            path: path.clone(),
            patch,
        }])
        .await
    }

    pub async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.commit(vec![Write::Delete { path: path.clone() }]).await
    }

    /// Delete a document and its subcollections. Every affected document
    /// must be deletable; otherwise nothing is removed.
    pub async fn delete_tree(&self, path: &DocPath) -> Result<u64, StoreError> {
        self.db
            .delete_tree_checked(path, |op, doc, existing, incoming| {
                self.authorize(op, doc.as_str(), existing, incoming)
            })
            .await
    }

    /// Apply a batch atomically; one denied write rejects the whole batch.
    pub async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        self.db
            .commit_checked(writes, |op, doc, existing, incoming| {
                self.authorize(op, doc.as_str(), existing, incoming)
            })
            .await
    }

    /// Read-modify-write one document. Both the read and the write are
    /// checked.
    pub async fn transact<T, F>(&self, path: &DocPath, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Option<&Document>) -> Result<TxOutcome<T>, StoreError>,
    {
        self.db
            .transact_checked(path, f, |op, doc, existing, incoming| {
                self.authorize(op, doc.as_str(), existing, incoming)
            })
            .await
    }
}

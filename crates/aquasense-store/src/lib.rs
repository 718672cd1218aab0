//! `AquaSense` document store.
//!
//! A hosted-database style document store on `SQLite`:
//! - Documents addressed by path, grouped in collections
//! - Filtered, ordered and limited collection queries
//! - Atomic batched writes and per-document transactions
//! - Server-assigned timestamps and live listeners
//! - [`SecuredStore`], which checks every operation against the access rules

mod db;
mod document;
mod error;
mod listen;
mod queries;
mod query;
mod secured;

pub use db::Database;
pub use document::{Document, SERVER_TIMESTAMP_KEY, Write, encode, server_timestamp};
pub use error::{ErrorKind, StoreError};
pub use listen::{Change, ChangeKind, Listener};
pub use queries::TxOutcome;
pub use query::{Direction, Filter, FilterOp, Query};
pub use secured::SecuredStore;

//! `AquaSense` Core Library
//!
//! Shared functionality for `AquaSense` components:
//! - Document paths and the pond domain model
//! - Hour/day/week/month period bucketing
//! - Declarative access rules and their evaluation engine
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod paths;
pub mod period;
pub mod rules;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::{Collection, CollectionPath, DocPath};
pub use period::{Period, PeriodKind};
pub use rules::{AccessAction, AccessRequest, AccessRule, Operation, Principal, RuleEngine};

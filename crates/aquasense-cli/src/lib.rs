//! `AquaSense` CLI Library
//!
//! Role dashboards over the pond document store. Every dashboard acts
//! through a rule-checked store for the signed-in user.

pub mod admin_cmd;
pub mod dashboard;
pub mod fmt;
pub mod live;
pub mod session;
pub mod super_cmd;
pub mod user_cmd;

pub use dashboard::{DashboardError, DashboardSettings};
pub use session::Session;

//! Role dashboards.
//!
//! Each dashboard is a thin set of queries and mutations over a
//! [`SecuredStore`](aquasense_store::SecuredStore) acting for the signed-in
//! user. Role checks here only pick which dashboard a session may open; the
//! access rules decide every individual read and write.

mod admin;
mod superadmin;
mod user;

pub use admin::{AdminDashboard, FleetRow};
pub use superadmin::{RoleCounts, SuperAdminDashboard, bootstrap_superadmin};
pub use user::{NewSchedule, Overview, ScheduleEdit, UserDashboard};

use aquasense_core::model::{Role, ScheduleStatus};
use aquasense_store::StoreError;

/// Dashboard errors.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] aquasense_core::Error),

    #[error("No profile for user '{0}'; register first")]
    UnknownUser(String),

    #[error("The {required} dashboard needs the {required} role (you are {actual})")]
    Forbidden { required: Role, actual: Role },

    #[error("Schedule '{id}' is {status} and can no longer be edited")]
    NotEditable { id: String, status: ScheduleStatus },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("A super-admin already exists")]
    AlreadyBootstrapped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DashboardError {
    /// Busy store or lost connection; worth trying again.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }

    pub const fn is_permission_denied(&self) -> bool {
        match self {
            Self::Store(e) => e.is_permission_denied(),
            Self::Forbidden { .. } => true,
            _ => false,
        }
    }
}

/// Shared dashboard settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardSettings {
    /// Pond local time offset, used to pick "today".
    pub utc_offset_secs: i32,
    pub default_limit: u32,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            utc_offset_secs: 0,
            default_limit: 20,
        }
    }
}

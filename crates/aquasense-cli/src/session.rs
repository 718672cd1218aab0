//! Signed-in session: who is acting and which dashboards they may open.

use std::sync::Arc;

use tracing::{debug, info};

use aquasense_core::model::{Role, UserProfile};
use aquasense_core::{Principal, RuleEngine, paths};
use aquasense_store::{Database, SecuredStore};

use crate::dashboard::{
    AdminDashboard, DashboardError, DashboardSettings, SuperAdminDashboard, UserDashboard,
};

/// A resolved session. The role is read from the profile once, when the
/// session starts.
pub struct Session {
    store: SecuredStore,
    profile: UserProfile,
    settings: DashboardSettings,
}

impl Session {
    /// Sign in as `uid`. The profile is read with the least privileged role,
    /// then the session acts with the role stored in it.
    pub async fn resolve(
        db: Database,
        rules: Arc<RuleEngine>,
        uid: &str,
        settings: DashboardSettings,
    ) -> Result<Self, DashboardError> {
        paths::validate_id(uid)?;
        let lookup = SecuredStore::new(db, rules, Principal::user(uid, Role::User));
        let profile: UserProfile = lookup
            .get_as(&paths::user(uid)?)
            .await?
            .ok_or_else(|| DashboardError::UnknownUser(uid.to_string()))?;
        debug!(uid, role = %profile.role, "Session resolved");
        let store = lookup.with_principal(Principal::user(uid, profile.role));
        Ok(Self {
            store,
            profile,
            settings,
        })
    }

    /// Create the caller's own profile with the user role and sign in.
    pub async fn register(
        db: Database,
        rules: Arc<RuleEngine>,
        uid: &str,
        name: &str,
        email: &str,
        now: i64,
        settings: DashboardSettings,
    ) -> Result<Self, DashboardError> {
        paths::validate_id(uid)?;
        if name.trim().is_empty() {
            return Err(DashboardError::Invalid("name must not be empty".into()));
        }
        let profile = UserProfile {
            uid: uid.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::User,
            joined_at: now,
        };
        let store = SecuredStore::new(db, rules, Principal::user(uid, Role::User));
        store.create(&paths::user(uid)?, &profile).await?;
        info!(uid, "Registered");
        Ok(Self {
            store,
            profile,
            settings,
        })
    }

    pub const fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub const fn role(&self) -> Role {
        self.profile.role
    }

    pub const fn settings(&self) -> DashboardSettings {
        self.settings
    }

    fn require(&self, required: Role) -> Result<(), DashboardError> {
        if self.profile.role >= required {
            Ok(())
        } else {
            Err(DashboardError::Forbidden {
                required,
                actual: self.profile.role,
            })
        }
    }

    /// The caller's own pond.
    pub fn user(&self) -> UserDashboard {
        UserDashboard::new(self.store.clone(), &self.profile.uid, self.settings)
    }

    pub fn admin(&self) -> Result<AdminDashboard, DashboardError> {
        self.require(Role::Admin)?;
        Ok(AdminDashboard::new(self.store.clone(), self.settings))
    }

    pub fn superadmin(&self) -> Result<SuperAdminDashboard, DashboardError> {
        self.require(Role::SuperAdmin)?;
        Ok(SuperAdminDashboard::new(self.store.clone(), self.settings))
    }
}

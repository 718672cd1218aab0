//! The super-admin dashboard: account management.

use serde_json::{Map, Value};
use tracing::info;

use aquasense_core::model::{Role, UserProfile};
use aquasense_core::paths;
use aquasense_store::{Database, Query, SecuredStore, TxOutcome, encode};

use super::{AdminDashboard, DashboardError, DashboardSettings};

/// Number of accounts per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleCounts {
    pub users: usize,
    pub admins: usize,
    pub superadmins: usize,
}

impl RoleCounts {
    pub const fn total(&self) -> usize {
        self.users + self.admins + self.superadmins
    }
}

#[derive(Clone)]
pub struct SuperAdminDashboard {
    store: SecuredStore,
    settings: DashboardSettings,
}

impl SuperAdminDashboard {
    pub const fn new(store: SecuredStore, settings: DashboardSettings) -> Self {
        Self { store, settings }
    }

    /// Everything the admin dashboard offers.
    pub fn admin(&self) -> AdminDashboard {
        AdminDashboard::new(self.store.clone(), self.settings)
    }

    fn acting_uid(&self) -> Option<&str> {
        self.store.principal().uid()
    }

    /// Create a profile for someone else with any role.
    pub async fn register_user(
        &self,
        uid: &str,
        name: &str,
        email: &str,
        role: Role,
        now: i64,
    ) -> Result<UserProfile, DashboardError> {
        let profile = UserProfile {
            uid: uid.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            joined_at: now,
        };
        self.store.create(&paths::user(uid)?, &profile).await?;
        info!(uid, %role, "User registered");
        Ok(profile)
    }

    pub async fn set_role(&self, uid: &str, role: Role) -> Result<UserProfile, DashboardError> {
        let path = paths::user(uid)?;
        if self.store.get(&path).await?.is_none() {
            return Err(DashboardError::UnknownUser(uid.to_string()));
        }
        if self.acting_uid() == Some(uid) && role < Role::SuperAdmin {
            return Err(DashboardError::Invalid(
                "a super-admin cannot demote themselves".into(),
            ));
        }
        let mut patch = Map::new();
        patch.insert("role".to_string(), Value::from(role.as_str()));
        self.store.update(&path, patch).await?;
        info!(uid, %role, "Role changed");
        self.store
            .get_as(&path)
            .await?
            .ok_or_else(|| DashboardError::UnknownUser(uid.to_string()))
    }

    /// Delete a profile and every document under it. Returns the number of
    /// documents removed.
    pub async fn delete_user(&self, uid: &str) -> Result<u64, DashboardError> {
        if self.acting_uid() == Some(uid) {
            return Err(DashboardError::Invalid(
                "a super-admin cannot delete themselves".into(),
            ));
        }
        let removed = self.store.delete_tree(&paths::user(uid)?).await?;
        if removed == 0 {
            return Err(DashboardError::UnknownUser(uid.to_string()));
        }
        info!(uid, removed, "User deleted");
        Ok(removed)
    }

    pub async fn role_counts(&self) -> Result<RoleCounts, DashboardError> {
        let profiles: Vec<UserProfile> = self.store.query_as(&Query::new(paths::users())).await?;
        let mut counts = RoleCounts::default();
        for profile in profiles {
            match profile.role {
                Role::User => counts.users += 1,
                Role::Admin => counts.admins += 1,
                Role::SuperAdmin => counts.superadmins += 1,
            }
        }
        Ok(counts)
    }
}

/// Create the first super-admin directly in the database, or promote an
/// existing profile. Refuses once any super-admin exists; the check and the
/// write share one transaction.
pub async fn bootstrap_superadmin(
    db: &Database,
    uid: &str,
    name: &str,
    email: &str,
    now: i64,
) -> Result<UserProfile, DashboardError> {
    let superadmins = Query::new(paths::users())
        .eq("role", Role::SuperAdmin.as_str())
        .limit(1);
    let path = paths::user(uid)?;

    let profile = db
        .transact_guarded(&superadmins, &path, |existing_admins, current| {
            if !existing_admins.is_empty() {
                return Ok(TxOutcome::Keep(None));
            }
            let data = match current {
                Some(doc) => {
                    let mut data = doc.data.clone();
                    if let Some(fields) = data.as_object_mut() {
                        fields.insert("role".to_string(), Value::from(Role::SuperAdmin.as_str()));
                    }
                    data
                }
                None => encode(&UserProfile {
                    uid: uid.to_string(),
                    name: name.to_string(),
                    email: email.to_string(),
                    role: Role::SuperAdmin,
                    joined_at: now,
                })?,
            };
            let profile: UserProfile = serde_json::from_value(data.clone())?;
            Ok(TxOutcome::Set(data, Some(profile)))
        })
        .await?
        .ok_or(DashboardError::AlreadyBootstrapped)?;

    info!(uid, "Super-admin bootstrapped");
    Ok(profile)
}

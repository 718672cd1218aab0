//! The admin dashboard: every pond, read-mostly.

use aquasense_core::model::{Role, SensorReading, UserProfile};
use aquasense_core::paths;
use aquasense_store::{Direction, Query, SecuredStore};

use super::{DashboardError, DashboardSettings, UserDashboard};

/// One row of the fleet overview.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetRow {
    pub profile: UserProfile,
    pub latest: Option<SensorReading>,
}

#[derive(Clone)]
pub struct AdminDashboard {
    store: SecuredStore,
    settings: DashboardSettings,
}

impl AdminDashboard {
    pub const fn new(store: SecuredStore, settings: DashboardSettings) -> Self {
        Self { store, settings }
    }

    /// Profiles ordered by name, optionally only one role.
    pub async fn list_users(&self, role: Option<Role>) -> Result<Vec<UserProfile>, DashboardError> {
        let mut query = Query::new(paths::users()).order_by("name", Direction::Asc);
        if let Some(role) = role {
            query = query.eq("role", role.as_str());
        }
        Ok(self.store.query_as(&query).await?)
    }

    /// The user dashboard of someone else's pond, still acting as this admin.
    pub async fn pond(&self, uid: &str) -> Result<UserDashboard, DashboardError> {
        paths::validate_id(uid)?;
        if self.store.get(&paths::user(uid)?).await?.is_none() {
            return Err(DashboardError::UnknownUser(uid.to_string()));
        }
        Ok(UserDashboard::new(self.store.clone(), uid, self.settings))
    }

    /// Every pond with its most recent reading.
    pub async fn fleet_summary(&self) -> Result<Vec<FleetRow>, DashboardError> {
        let mut rows = Vec::new();
        for profile in self.list_users(None).await? {
            let pond = UserDashboard::new(self.store.clone(), &profile.uid, self.settings);
            let latest = pond.latest_readings(Some(1)).await?.into_iter().next();
            rows.push(FleetRow { profile, latest });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aquasense_core::paths::Collection;
    use aquasense_core::{Principal, RuleEngine};
    use aquasense_store::Database;
    use serde_json::json;

    use super::*;
    use crate::dashboard::NewSchedule;

    async fn seeded() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        for (uid, name, role) in [("a1", "Alice", "admin"), ("u1", "Bob", "user"), ("u2", "Cara", "user")] {
            db.create(
                &paths::user(uid).unwrap(),
                json!({"uid": uid, "name": name, "email": format!("{uid}@example.com"), "role": role, "joined_at": 0}),
            )
            .await
            .unwrap();
        }
        db.create(
            &paths::doc("u1", Collection::SensorReadings, "r1").unwrap(),
            json!({"id": "r1", "uid": "u1", "recorded_at": 50, "ph": 7.1}),
        )
        .await
        .unwrap();
        db
    }

    fn admin(db: &Database) -> AdminDashboard {
        let store = SecuredStore::new(
            db.clone(),
            Arc::new(RuleEngine::new()),
            Principal::user("a1", Role::Admin),
        );
        AdminDashboard::new(store, DashboardSettings::default())
    }

    #[tokio::test]
    async fn lists_users_by_name_and_role() {
        let db = seeded().await;
        let dash = admin(&db);
        let names: Vec<_> = dash
            .list_users(None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Cara"]);
        assert_eq!(dash.list_users(Some(Role::User)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fleet_shows_latest_reading_per_pond() {
        let db = seeded().await;
        let rows = admin(&db).fleet_summary().await.unwrap();
        let bob = rows.iter().find(|r| r.profile.uid == "u1").unwrap();
        assert_eq!(bob.latest.as_ref().unwrap().ph, Some(7.1));
        let cara = rows.iter().find(|r| r.profile.uid == "u2").unwrap();
        assert!(cara.latest.is_none());
    }

    #[tokio::test]
    async fn admin_schedules_but_cannot_log_mortality_for_others() {
        let db = seeded().await;
        let pond = admin(&db).pond("u1").await.unwrap();
        pond.create_schedule(
            NewSchedule {
                scheduled_at: 100,
                feed_amount: 10.0,
                notes: String::new(),
                repeat: None,
            },
            100,
        )
        .await
        .unwrap();
        let err = pond.record_mortality(1, None, "", 100).await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn unknown_pond_is_reported() {
        let db = seeded().await;
        assert!(matches!(
            admin(&db).pond("nobody").await,
            Err(DashboardError::UnknownUser(_))
        ));
    }
}

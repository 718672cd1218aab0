//! The user dashboard: one pond, seen by its owner (or by staff).

use serde_json::{Map, Value};

use aquasense_core::model::{
    FeedingLog, MortalityLog, PeriodReport, Repeat, Schedule, ScheduleStatus, SensorReading,
    UserProfile,
};
use aquasense_core::paths::{self, Collection};
use aquasense_core::{CollectionPath, DocPath, Period, PeriodKind};
use aquasense_store::{Direction, FilterOp, Query, SecuredStore, TxOutcome, encode};

use super::{DashboardError, DashboardSettings};

/// Summary shown on entering the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub profile: UserProfile,
    pub latest_reading: Option<SensorReading>,
    pub next_schedule: Option<Schedule>,
    pub today: Option<PeriodReport>,
}

/// A schedule to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub scheduled_at: i64,
    pub feed_amount: f64,
    pub notes: String,
    pub repeat: Option<Repeat>,
}

/// Changes to a pending schedule. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleEdit {
    pub scheduled_at: Option<i64>,
    pub feed_amount: Option<f64>,
    pub notes: Option<String>,
    /// `Some(None)` clears the repetition.
    #[allow(clippy::option_option)]
    pub repeat: Option<Option<Repeat>>,
}

fn validate_amount(amount: f64) -> Result<(), DashboardError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(DashboardError::Invalid(format!(
            "feed amount must be a positive number of grams, got {amount}"
        )))
    }
}

/// Reads and writes for the pond of `uid`.
#[derive(Clone)]
pub struct UserDashboard {
    store: SecuredStore,
    uid: String,
    settings: DashboardSettings,
}

impl UserDashboard {
    pub fn new(store: SecuredStore, uid: &str, settings: DashboardSettings) -> Self {
        Self {
            store,
            uid: uid.to_string(),
            settings,
        }
    }

    /// Owner of the pond this dashboard shows.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub const fn store(&self) -> &SecuredStore {
        &self.store
    }

    fn collection(&self, collection: Collection) -> Result<CollectionPath, DashboardError> {
        Ok(paths::collection(&self.uid, collection)?)
    }

    fn doc(&self, collection: Collection, id: &str) -> Result<DocPath, DashboardError> {
        Ok(paths::doc(&self.uid, collection, id)?)
    }

    fn limit_or_default(&self, limit: Option<u32>) -> u32 {
        limit.unwrap_or(self.settings.default_limit)
    }

    // =========================================================================
    // Overview
    // =========================================================================

    pub async fn profile(&self) -> Result<UserProfile, DashboardError> {
        self.store
            .get_as(&paths::user(&self.uid)?)
            .await?
            .ok_or_else(|| DashboardError::UnknownUser(self.uid.clone()))
    }

    pub async fn overview(&self, now: i64) -> Result<Overview, DashboardError> {
        let profile = self.profile().await?;
        let latest_reading = self.latest_readings(Some(1)).await?.into_iter().next();
        let next_schedule = self
            .schedules(Some(ScheduleStatus::Pending))
            .await?
            .into_iter()
            .next();
        let today = Period::containing(PeriodKind::Day, now, self.settings.utc_offset_secs)?;
        let today = self
            .store
            .get_as(&self.doc(PeriodKind::Day.collection(), &today.key)?)
            .await?;
        Ok(Overview {
            profile,
            latest_reading,
            next_schedule,
            today,
        })
    }

    // =========================================================================
    // Sensor readings
    // =========================================================================

    /// Readings recorded in `[from, to)`, oldest first.
    pub async fn readings(
        &self,
        from: i64,
        to: i64,
        limit: Option<u32>,
    ) -> Result<Vec<SensorReading>, DashboardError> {
        let query = Query::new(self.collection(Collection::SensorReadings)?)
            .filter("recorded_at", FilterOp::Ge, from)
            .filter("recorded_at", FilterOp::Lt, to)
            .order_by("recorded_at", Direction::Asc)
            .limit(self.limit_or_default(limit));
        Ok(self.store.query_as(&query).await?)
    }

    /// Query for the most recent readings, newest first.
    pub fn latest_readings_query(&self, limit: Option<u32>) -> Result<Query, DashboardError> {
        Ok(Query::new(self.collection(Collection::SensorReadings)?)
            .order_by("recorded_at", Direction::Desc)
            .limit(self.limit_or_default(limit)))
    }

    pub async fn latest_readings(&self, limit: Option<u32>) -> Result<Vec<SensorReading>, DashboardError> {
        let query = self.latest_readings_query(limit)?;
        Ok(self.store.query_as(&query).await?)
    }

    // =========================================================================
    // Schedules
    // =========================================================================

    /// Schedules ordered by time, optionally only those in `status`.
    pub async fn schedules(&self, status: Option<ScheduleStatus>) -> Result<Vec<Schedule>, DashboardError> {
        let mut query = Query::new(self.collection(Collection::Schedules)?)
            .order_by("scheduled_at", Direction::Asc);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }
        Ok(self.store.query_as(&query).await?)
    }

    pub async fn create_schedule(&self, new: NewSchedule, now: i64) -> Result<Schedule, DashboardError> {
        validate_amount(new.feed_amount)?;
        let path = self.collection(Collection::Schedules)?.new_doc();
        let mut schedule = Schedule::new(
            &self.uid,
            path.id(),
            new.scheduled_at,
            new.feed_amount,
            &new.notes,
        );
        schedule.repeat = new.repeat;
        schedule.created_at = now;
        self.store.create(&path, &schedule).await?;
        Ok(schedule)
    }

    /// Edit a schedule that is still pending.
    pub async fn update_schedule(&self, id: &str, edit: ScheduleEdit) -> Result<Schedule, DashboardError> {
        if let Some(amount) = edit.feed_amount {
            validate_amount(amount)?;
        }
        let path = self.doc(Collection::Schedules, id)?;
        let outcome = self
            .store
            .transact(&path, |doc| {
                let Some(doc) = doc else {
                    return Ok(TxOutcome::Keep(Err(None)));
                };
                let mut schedule: Schedule = doc.decode()?;
                if schedule.status != ScheduleStatus::Pending {
                    return Ok(TxOutcome::Keep(Err(Some(schedule.status))));
                }
                if let Some(at) = edit.scheduled_at {
                    schedule.scheduled_at = at;
                }
                if let Some(amount) = edit.feed_amount {
                    schedule.feed_amount = amount;
                }
                if let Some(notes) = edit.notes {
                    schedule.notes = notes;
                }
                if let Some(repeat) = edit.repeat {
                    schedule.repeat = repeat;
                }
                Ok(TxOutcome::Set(encode(&schedule)?, Ok(schedule)))
            })
            .await?;
        outcome.map_err(|status| self.not_editable(id, status))
    }

    /// Delete a schedule that is still pending.
    pub async fn delete_schedule(&self, id: &str) -> Result<(), DashboardError> {
        let path = self.doc(Collection::Schedules, id)?;
        let outcome = self
            .store
            .transact(&path, |doc| {
                let Some(doc) = doc else {
                    return Ok(TxOutcome::Keep(Err(None)));
                };
                let schedule: Schedule = doc.decode()?;
                if schedule.status == ScheduleStatus::Pending {
                    Ok(TxOutcome::Delete(Ok(())))
                } else {
                    Ok(TxOutcome::Keep(Err(Some(schedule.status))))
                }
            })
            .await?;
        outcome.map_err(|status| self.not_editable(id, status))
    }

    fn not_editable(&self, id: &str, status: Option<ScheduleStatus>) -> DashboardError {
        match status {
            Some(status) => DashboardError::NotEditable {
                id: id.to_string(),
                status,
            },
            None => DashboardError::NotFound(format!("schedule '{id}' of {}", self.uid)),
        }
    }

    /// Queue a one-off feeding for the runtime's next tick.
    pub async fn feed_now(&self, amount: f64, notes: &str, now: i64) -> Result<Schedule, DashboardError> {
        self.create_schedule(
            NewSchedule {
                scheduled_at: now,
                feed_amount: amount,
                notes: notes.to_string(),
                repeat: None,
            },
            now,
        )
        .await
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// Most recent feeding logs, newest first.
    pub async fn feeding_logs(&self, limit: Option<u32>) -> Result<Vec<FeedingLog>, DashboardError> {
        let query = Query::new(self.collection(Collection::FeedingLogs)?)
            .order_by("fed_at", Direction::Desc)
            .limit(self.limit_or_default(limit));
        Ok(self.store.query_as(&query).await?)
    }

    pub async fn record_mortality(
        &self,
        count: u32,
        cause: Option<String>,
        notes: &str,
        recorded_at: i64,
    ) -> Result<MortalityLog, DashboardError> {
        if count == 0 {
            return Err(DashboardError::Invalid("mortality count must be at least 1".into()));
        }
        let path = self.collection(Collection::MortalityLogs)?.new_doc();
        let log = MortalityLog {
            id: path.id().to_string(),
            uid: self.uid.clone(),
            recorded_at,
            count,
            cause,
            notes: notes.to_string(),
        };
        self.store.create(&path, &log).await?;
        Ok(log)
    }

    /// Most recent mortality events, newest first.
    pub async fn mortality_logs(&self, limit: Option<u32>) -> Result<Vec<MortalityLog>, DashboardError> {
        let query = Query::new(self.collection(Collection::MortalityLogs)?)
            .order_by("recorded_at", Direction::Desc)
            .limit(self.limit_or_default(limit));
        Ok(self.store.query_as(&query).await?)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Reports of `kind` whose bucket starts in `[from, to)`, oldest first.
    pub async fn reports(
        &self,
        kind: PeriodKind,
        from: i64,
        to: i64,
    ) -> Result<Vec<PeriodReport>, DashboardError> {
        let query = Query::new(self.collection(kind.collection())?)
            .filter("start", FilterOp::Ge, from)
            .filter("start", FilterOp::Lt, to)
            .order_by("start", Direction::Asc);
        Ok(self.store.query_as(&query).await?)
    }

    /// Patch own profile fields other than the role.
    pub async fn update_profile(
        &self,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<UserProfile, DashboardError> {
        let mut patch = Map::new();
        if let Some(name) = name {
            patch.insert("name".to_string(), Value::String(name));
        }
        if let Some(email) = email {
            patch.insert("email".to_string(), Value::String(email));
        }
        if !patch.is_empty() {
            self.store.update(&paths::user(&self.uid)?, patch).await?;
        }
        self.profile().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aquasense_core::model::Role;
    use aquasense_core::{Principal, RuleEngine};
    use aquasense_store::Database;
    use serde_json::json;

    use super::*;

    // 2026-10-19T14:35:10Z
    const NOW: i64 = 1_792_420_510;

    async fn dashboard(uid: &str) -> (Database, UserDashboard) {
        let db = Database::open_in_memory().await.unwrap();
        db.create(
            &paths::user(uid).unwrap(),
            json!({"uid": uid, "name": "Ann", "email": "ann@example.com", "role": "user", "joined_at": 0}),
        )
        .await
        .unwrap();
        let store = SecuredStore::new(
            db.clone(),
            Arc::new(RuleEngine::new()),
            Principal::user(uid, Role::User),
        );
        (db, UserDashboard::new(store, uid, DashboardSettings::default()))
    }

    fn new_schedule(at: i64) -> NewSchedule {
        NewSchedule {
            scheduled_at: at,
            feed_amount: 20.0,
            notes: String::new(),
            repeat: None,
        }
    }

    #[tokio::test]
    async fn overview_of_empty_pond() {
        let (_db, dash) = dashboard("u1").await;
        let overview = dash.overview(NOW).await.unwrap();
        assert_eq!(overview.profile.name, "Ann");
        assert!(overview.latest_reading.is_none());
        assert!(overview.next_schedule.is_none());
        assert!(overview.today.is_none());
    }

    #[tokio::test]
    async fn schedules_are_listed_in_time_order() {
        let (_db, dash) = dashboard("u1").await;
        dash.create_schedule(new_schedule(NOW + 200), NOW).await.unwrap();
        dash.create_schedule(new_schedule(NOW + 100), NOW).await.unwrap();

        let listed = dash.schedules(None).await.unwrap();
        let times: Vec<_> = listed.iter().map(|s| s.scheduled_at).collect();
        assert_eq!(times, vec![NOW + 100, NOW + 200]);
        let overview = dash.overview(NOW).await.unwrap();
        assert_eq!(overview.next_schedule.unwrap().scheduled_at, NOW + 100);
    }

    #[tokio::test]
    async fn rejects_nonsense_amounts() {
        let (_db, dash) = dashboard("u1").await;
        let mut bad = new_schedule(NOW);
        bad.feed_amount = -1.0;
        assert!(matches!(
            dash.create_schedule(bad, NOW).await,
            Err(DashboardError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn only_pending_schedules_are_editable() {
        let (db, dash) = dashboard("u1").await;
        let schedule = dash.create_schedule(new_schedule(NOW), NOW).await.unwrap();

        let edited = dash
            .update_schedule(
                &schedule.id,
                ScheduleEdit {
                    feed_amount: Some(35.0),
                    ..ScheduleEdit::default()
                },
            )
            .await
            .unwrap();
        assert!((edited.feed_amount - 35.0).abs() < f64::EPSILON);

        let path = paths::doc("u1", Collection::Schedules, &schedule.id).unwrap();
        let mut patch = Map::new();
        patch.insert("status".into(), json!("in-progress"));
        db.update(&path, patch).await.unwrap();

        let err = dash
            .update_schedule(&schedule.id, ScheduleEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::NotEditable { .. }));
        let err = dash.delete_schedule(&schedule.id).await.unwrap_err();
        assert!(matches!(err, DashboardError::NotEditable { .. }));
        assert!(matches!(
            dash.delete_schedule("missing").await,
            Err(DashboardError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn feed_now_queues_a_due_schedule() {
        let (_db, dash) = dashboard("u1").await;
        let queued = dash.feed_now(15.0, "extra", NOW).await.unwrap();
        assert!(queued.is_due(NOW));
        assert_eq!(queued.repeat, None);
    }

    #[tokio::test]
    async fn mortality_round_trip() {
        let (_db, dash) = dashboard("u1").await;
        dash.record_mortality(3, Some("heat".into()), "", NOW).await.unwrap();
        assert!(dash.record_mortality(0, None, "", NOW).await.is_err());
        let logs = dash.mortality_logs(None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].count, 3);
    }

    #[tokio::test]
    async fn readings_in_range_and_latest() {
        let (db, dash) = dashboard("u1").await;
        for (id, at) in [("a", NOW - 100), ("b", NOW), ("c", NOW + 100)] {
            db.create(
                &paths::doc("u1", Collection::SensorReadings, id).unwrap(),
                json!({"id": id, "uid": "u1", "recorded_at": at}),
            )
            .await
            .unwrap();
        }

        let range = dash.readings(NOW - 100, NOW + 100, None).await.unwrap();
        let ids: Vec<_> = range.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let latest = dash.latest_readings(Some(1)).await.unwrap();
        assert_eq!(latest[0].id, "c");
    }

    #[tokio::test]
    async fn profile_edit_keeps_role() {
        let (_db, dash) = dashboard("u1").await;
        let profile = dash
            .update_profile(Some("Anna".into()), None)
            .await
            .unwrap();
        assert_eq!(profile.name, "Anna");
        assert_eq!(profile.role, Role::User);
    }
}

//! Pond domain model.
//!
//! These are the document bodies stored under `users/{uid}`. Every record
//! carries its owning uid so a document read out of context still says whose
//! pond it belongs to.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::period::{Period, PeriodKind};

/// Account role. Ordered: `User < Admin < SuperAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "superadmin")]
    SuperAdmin,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::User, Self::Admin, Self::SuperAdmin];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "superadmin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "superadmin" | "super-admin" => Ok(Self::SuperAdmin),
            other => Err(Error::Config(format!("unknown role '{other}'"))),
        }
    }
}

/// Profile document at `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub joined_at: i64,
}

/// Lifecycle of a feeding schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleStatus {
    Pending,
    InProgress,
    Completed,
}

impl ScheduleStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }

    /// Completed is terminal; in-progress may fall back to pending for a retry.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Completed, Self::Completed) => true,
            (Self::Completed, _) => false,
            (Self::Pending | Self::InProgress, _) => true,
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repetition of a schedule after it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Daily,
    Weekly,
}

impl Repeat {
    pub const fn interval_secs(&self) -> i64 {
        match self {
            Self::Daily => 86_400,
            Self::Weekly => 7 * 86_400,
        }
    }
}

/// Feeding schedule at `users/{uid}/schedules/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub uid: String,
    pub scheduled_at: i64,
    /// Grams of feed.
    pub feed_amount: f64,
    #[serde(default)]
    pub notes: String,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub repeat: Option<Repeat>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl Schedule {
    pub fn new(uid: &str, id: &str, scheduled_at: i64, feed_amount: f64, notes: &str) -> Self {
        Self {
            id: id.to_string(),
            uid: uid.to_string(),
            scheduled_at,
            feed_amount,
            notes: notes.to_string(),
            status: ScheduleStatus::Pending,
            repeat: None,
            attempts: 0,
            last_error: None,
            created_at: scheduled_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == ScheduleStatus::Pending && self.scheduled_at <= now
    }

    /// Move to `next`, refusing to leave `completed`.
    pub fn transition(&mut self, next: ScheduleStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Next pending occurrence of a repeating schedule, skipping occurrences
    /// that are already in the past at `now`.
    pub fn next_occurrence(&self, id: &str, now: i64) -> Option<Self> {
        let step = self.repeat?.interval_secs();
        let mut at = self.scheduled_at + step;
        if at <= now {
            let missed = (now - at) / step + 1;
            at += missed * step;
        }
        Some(Self {
            id: id.to_string(),
            scheduled_at: at,
            status: ScheduleStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            ..self.clone()
        })
    }
}

/// Feeding log at `users/{uid}/feeding_logs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingLog {
    pub id: String,
    pub uid: String,
    #[serde(default)]
    pub schedule_id: Option<String>,
    pub fed_at: i64,
    pub feed_amount: f64,
    #[serde(default)]
    pub notes: String,
}

/// Water-quality sample at `users/{uid}/sensor_readings/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SensorReading {
    pub id: String,
    pub uid: String,
    pub recorded_at: i64,
    /// Degrees Celsius.
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub ph: Option<f64>,
    /// mg/L.
    #[serde(default)]
    pub dissolved_oxygen: Option<f64>,
    /// mg/L.
    #[serde(default)]
    pub ammonia: Option<f64>,
}

/// Mortality event at `users/{uid}/mortality_logs/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MortalityLog {
    pub id: String,
    pub uid: String,
    pub recorded_at: i64,
    pub count: u32,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// Running statistics for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricStats {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricStats {
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Sensor statistics of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReadingStats {
    pub readings: u64,
    pub temperature: MetricStats,
    pub ph: MetricStats,
    pub dissolved_oxygen: MetricStats,
    pub ammonia: MetricStats,
}

impl ReadingStats {
    pub fn fold(&mut self, reading: &SensorReading) {
        self.readings += 1;
        let metrics = [
            (&mut self.temperature, reading.temperature),
            (&mut self.ph, reading.ph),
            (&mut self.dissolved_oxygen, reading.dissolved_oxygen),
            (&mut self.ammonia, reading.ammonia),
        ];
        for (stats, value) in metrics {
            if let Some(v) = value {
                stats.record(v);
            }
        }
    }
}

/// Feeding totals of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FeedStats {
    pub feedings: u64,
    pub total_amount: f64,
}

impl FeedStats {
    pub fn fold(&mut self, log: &FeedingLog) {
        self.feedings += 1;
        self.total_amount += log.feed_amount;
    }
}

/// Mortality totals of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MortalityStats {
    pub events: u64,
    pub deaths: u64,
}

impl MortalityStats {
    pub fn fold(&mut self, log: &MortalityLog) {
        self.events += 1;
        self.deaths += u64::from(log.count);
    }
}

/// Aggregate bucket. Stored as an hourly record, or a daily, weekly or
/// monthly report depending on `kind`; the document id is `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub uid: String,
    pub kind: PeriodKind,
    pub key: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub readings: ReadingStats,
    #[serde(default)]
    pub feeding: FeedStats,
    #[serde(default)]
    pub mortality: MortalityStats,
    pub updated_at: i64,
}

impl PeriodReport {
    pub fn empty(uid: &str, period: &Period) -> Self {
        Self {
            uid: uid.to_string(),
            kind: period.kind,
            key: period.key.clone(),
            start: period.start,
            end: period.end,
            readings: ReadingStats::default(),
            feeding: FeedStats::default(),
            mortality: MortalityStats::default(),
            updated_at: period.start,
        }
    }
}

pub type HourlyRecord = PeriodReport;
pub type DailyReport = PeriodReport;
pub type WeeklyReport = PeriodReport;
pub type MonthlyReport = PeriodReport;

/// Per-owner aggregation progress at `users/{uid}/runtime_state/aggregation`.
///
/// Each field is the highest store sequence already folded into reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AggregationCursor {
    #[serde(default)]
    pub readings_seq: i64,
    #[serde(default)]
    pub feedings_seq: i64,
    #[serde(default)]
    pub mortality_seq: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Document id of the aggregation cursor.
pub const AGGREGATION_CURSOR_ID: &str = "aggregation";

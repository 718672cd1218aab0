//! Calendar buckets for aggregated reports.
//!
//! Buckets are computed in the pond's fixed UTC offset. Hours and days are
//! plain second arithmetic on the shifted timestamp; weeks follow ISO-8601
//! (Monday start) and months the calendar.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::Collection;

const HOUR_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;

/// Granularity of an aggregate bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Hour,
    Day,
    Week,
    Month,
}

impl PeriodKind {
    pub const ALL: [Self; 4] = [Self::Hour, Self::Day, Self::Week, Self::Month];

    /// Subcollection the bucket documents live in.
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Hour => Collection::HourlyRecords,
            Self::Day => Collection::DailyReports,
            Self::Week => Collection::WeeklyReports,
            Self::Month => Collection::MonthlyReports,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl std::fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PeriodKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hour" | "hourly" => Ok(Self::Hour),
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            other => Err(Error::Config(format!("unknown period kind '{other}'"))),
        }
    }
}

/// One concrete bucket: `[start, end)` in unix seconds plus its document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    pub kind: PeriodKind,
    pub key: String,
    pub start: i64,
    pub end: i64,
}

impl Period {
    /// Bucket of `kind` containing `timestamp`, for a pond whose local time
    /// is `offset_secs` ahead of UTC.
    pub fn containing(kind: PeriodKind, timestamp: i64, offset_secs: i32) -> Result<Self> {
        let offset = i64::from(offset_secs);
        let local_ts = timestamp
            .checked_add(offset)
            .ok_or(Error::InvalidTimestamp(timestamp))?;
        let local = naive(local_ts).ok_or(Error::InvalidTimestamp(timestamp))?;

        let (key, local_start, local_end) = match kind {
            PeriodKind::Hour => {
                let start = local_ts - local_ts.rem_euclid(HOUR_SECS);
                (local.format("%Y-%m-%dT%H").to_string(), start, start + HOUR_SECS)
            }
            PeriodKind::Day => {
                let start = local_ts - local_ts.rem_euclid(DAY_SECS);
                (local.format("%Y-%m-%d").to_string(), start, start + DAY_SECS)
            }
            PeriodKind::Week => {
                let day_start = local_ts - local_ts.rem_euclid(DAY_SECS);
                let since_monday = i64::from(local.weekday().num_days_from_monday());
                let start = day_start - since_monday * DAY_SECS;
                let week = local.iso_week();
                (
                    format!("{:04}-W{:02}", week.year(), week.week()),
                    start,
                    start + 7 * DAY_SECS,
                )
            }
            PeriodKind::Month => {
                let (year, month) = (local.year(), local.month());
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                let start = month_start(year, month).ok_or(Error::InvalidTimestamp(timestamp))?;
                let end = month_start(next_year, next_month)
                    .ok_or(Error::InvalidTimestamp(timestamp))?;
                (format!("{year:04}-{month:02}"), start, end)
            }
        };

        Ok(Self {
            kind,
            key,
            start: local_start - offset,
            end: local_end - offset,
        })
    }

    /// Every bucket (one per kind) containing `timestamp`.
    pub fn all_containing(timestamp: i64, offset_secs: i32) -> Result<Vec<Self>> {
        PeriodKind::ALL
            .iter()
            .map(|kind| Self::containing(*kind, timestamp, offset_secs))
            .collect()
    }

    pub const fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

fn naive(local_ts: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(local_ts, 0).map(|dt| dt.naive_utc())
}

/// Local-time unix seconds of the first instant of a month.
fn month_start(year: i32, month: u32) -> Option<i64> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
}

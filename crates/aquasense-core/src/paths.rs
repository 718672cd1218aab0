//! Document and collection paths.
//!
//! Paths are slash-separated segment lists. A document path has an even
//! number of segments (`users/u1`, `users/u1/schedules/s1`), a collection
//! path an odd number (`users`, `users/u1/schedules`). Every per-user
//! collection lives under `users/{uid}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Root collection holding one profile document per user.
pub const USERS: &str = "users";

/// Per-user subcollections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Schedules,
    FeedingLogs,
    SensorReadings,
    HourlyRecords,
    DailyReports,
    WeeklyReports,
    MonthlyReports,
    MortalityLogs,
    RuntimeState,
}

impl Collection {
    pub const ALL: [Self; 9] = [
        Self::Schedules,
        Self::FeedingLogs,
        Self::SensorReadings,
        Self::HourlyRecords,
        Self::DailyReports,
        Self::WeeklyReports,
        Self::MonthlyReports,
        Self::MortalityLogs,
        Self::RuntimeState,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Schedules => "schedules",
            Self::FeedingLogs => "feeding_logs",
            Self::SensorReadings => "sensor_readings",
            Self::HourlyRecords => "hourly_records",
            Self::DailyReports => "daily_reports",
            Self::WeeklyReports => "weekly_reports",
            Self::MonthlyReports => "monthly_reports",
            Self::MortalityLogs => "mortality_logs",
            Self::RuntimeState => "runtime_state",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn invalid(path: &str, reason: &str) -> Error {
    Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_segments(path: &str) -> Result<usize> {
    if path.is_empty() {
        return Err(invalid(path, "empty path"));
    }
    let mut count = 0;
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(invalid(path, "empty segment"));
        }
        if segment == "." || segment == ".." {
            return Err(invalid(path, "relative segment"));
        }
        if segment.chars().any(char::is_control) {
            return Err(invalid(path, "control character in segment"));
        }
        count += 1;
    }
    Ok(count)
}

/// Validate a single id (uid, document id) before it is spliced into a path.
pub fn validate_id(id: &str) -> Result<()> {
    if id.contains('/') {
        return Err(invalid(id, "id must not contain '/'"));
    }
    validate_segments(id).map(|_| ())
}

/// Path to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(path: &str) -> Result<Self> {
        let count = validate_segments(path)?;
        if count % 2 != 0 {
            return Err(invalid(path, "document paths need an even number of segments"));
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        match self.0.rfind('/') {
            Some(idx) => CollectionPath(self.0[..idx].to_string()),
            None => CollectionPath(self.0.clone()),
        }
    }

    /// Subcollection under this document.
    pub fn collection(&self, name: &str) -> Result<CollectionPath> {
        validate_id(name)?;
        Ok(CollectionPath(format!("{}/{name}", self.0)))
    }

    /// Owning uid when the path lives under `users/{uid}`.
    pub fn owner(&self) -> Option<&str> {
        let mut segments = self.segments();
        match (segments.next(), segments.next()) {
            (Some(USERS), Some(uid)) => Some(uid),
            _ => None,
        }
    }

    /// Whether `other` is this document or nested below it.
    pub fn contains(&self, other: &str) -> bool {
        other == self.0
            || other
                .strip_prefix(self.0.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(value: DocPath) -> Self {
        value.0
    }
}

/// Path to a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn parse(path: &str) -> Result<Self> {
        let count = validate_segments(path)?;
        if count % 2 == 0 {
            return Err(invalid(path, "collection paths need an odd number of segments"));
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Document with the given id inside this collection.
    pub fn doc(&self, id: &str) -> Result<DocPath> {
        validate_id(id)?;
        Ok(DocPath(format!("{}/{id}", self.0)))
    }

    /// Document with a freshly generated id.
    pub fn new_doc(&self) -> DocPath {
        DocPath(format!("{}/{}", self.0, uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CollectionPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CollectionPath> for String {
    fn from(value: CollectionPath) -> Self {
        value.0
    }
}

/// The root `users` collection.
pub fn users() -> CollectionPath {
    CollectionPath(USERS.to_string())
}

/// Profile document of a user: `users/{uid}`.
pub fn user(uid: &str) -> Result<DocPath> {
    users().doc(uid)
}

/// A per-user subcollection: `users/{uid}/{collection}`.
pub fn collection(uid: &str, collection: Collection) -> Result<CollectionPath> {
    user(uid)?.collection(collection.as_str())
}

/// A document in a per-user subcollection.
pub fn doc(uid: &str, collection: Collection, id: &str) -> Result<DocPath> {
    self::collection(uid, collection)?.doc(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_paths_need_even_segments() {
        assert!(DocPath::parse("users/u1").is_ok());
        assert!(DocPath::parse("users/u1/schedules/s1").is_ok());
        assert!(DocPath::parse("users").is_err());
        assert!(DocPath::parse("users/u1/schedules").is_err());
    }

    #[test]
    fn rejects_empty_and_relative_segments() {
        assert!(DocPath::parse("").is_err());
        assert!(DocPath::parse("users//x").is_err());
        assert!(DocPath::parse("users/..").is_err());
        assert!(validate_id("a/b").is_err());
    }

    #[test]
    fn parent_id_and_owner() {
        let path = doc("u1", Collection::Schedules, "s1").unwrap();
        assert_eq!(path.as_str(), "users/u1/schedules/s1");
        assert_eq!(path.id(), "s1");
        assert_eq!(path.parent().as_str(), "users/u1/schedules");
        assert_eq!(path.owner(), Some("u1"));
        assert_eq!(user("u1").unwrap().parent(), users());
    }

    #[test]
    fn contains_only_matches_whole_segments() {
        let root = user("u1").unwrap();
        assert!(root.contains("users/u1"));
        assert!(root.contains("users/u1/schedules/s1"));
        assert!(!root.contains("users/u10/schedules/s1"));
    }

    #[test]
    fn new_doc_ids_are_unique() {
        let coll = collection("u1", Collection::FeedingLogs).unwrap();
        assert_ne!(coll.new_doc(), coll.new_doc());
    }

    #[test]
    fn paths_roundtrip_through_serde() {
        let path = doc("u1", Collection::DailyReports, "2026-10-19").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"users/u1/daily_reports/2026-10-19\"");
        let back: DocPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<DocPath>("\"users\"").is_err());
    }
}

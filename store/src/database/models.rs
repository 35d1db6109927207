//! Database models
//!
//! Rust structs representing stored entities. Field names on the wire are
//! camelCase, matching the documents the UI layer reads and the legacy
//! flat-list format.

use super::codec;
use super::schema::{self, CollectionDef};
use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A child collection whose records are removed together with their parent.
#[derive(Debug)]
pub struct Cascade {
    pub collection: &'static CollectionDef,
    /// Index on the child that holds the parent's key
    pub index: &'static str,
}

/// An entity kind stored in its own collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Borrowed form of the primary key accepted by lookups and deletes.
    type Key: ?Sized + Sync;

    const COLLECTION: &'static CollectionDef;

    /// Child collections cleared when a record of this kind is deleted.
    const CASCADES: &'static [Cascade] = &[];

    fn encode_key(key: &Self::Key) -> String;

    /// Encoded primary key of this record.
    fn storage_key(&self) -> String;

    /// Optimistic-concurrency version, for kinds that carry one.
    fn version(&self) -> Option<u64> {
        None
    }

    fn set_version(&mut self, _version: u64) {}

    /// Structural check run before every write.
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

// ===== Events =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Task,
    Event,
    Assignment,
    Exam,
}

/// A task or calendar event on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: EventStatus,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub course: String,
    #[serde(with = "codec::iso8601")]
    pub start_time: DateTime<Utc>,
    #[serde(
        default,
        with = "codec::iso8601_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    /// Remaining task fields (description, tags, ...), kept verbatim.
    /// Must not repeat a named field.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Document keys written from `Event`'s named fields
const EVENT_FIELDS: &[&str] = &["id", "title", "status", "type", "course", "startTime", "endTime"];

impl Record for Event {
    type Key = str;
    const COLLECTION: &'static CollectionDef = &schema::EVENTS;

    fn encode_key(key: &str) -> String {
        key.to_string()
    }

    fn storage_key(&self) -> String {
        self.id.clone()
    }

    fn check(&self) -> Result<()> {
        match self.details.keys().find(|key| EVENT_FIELDS.contains(&key.as_str())) {
            Some(key) => Err(StoreError::InvalidRecord(format!(
                "Event {} repeats field '{}' in its details",
                self.id, key
            ))),
            None => Ok(()),
        }
    }
}

// ===== Goals =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalCategory {
    Academic,
    Personal,
    Fitness,
    Skill,
    Habit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalPeriod {
    Daily,
    Weekly,
    Monthly,
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Completed,
    Paused,
    Failed,
}

/// A measurable target the user is working towards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: GoalCategory,
    #[serde(rename = "type")]
    pub period: GoalPeriod,
    pub target: f64,
    pub current: f64,
    pub unit: String,
    #[serde(
        default,
        with = "codec::iso8601_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "codec::iso8601_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub status: GoalStatus,
    pub streak: u32,
    #[serde(with = "codec::iso8601")]
    pub last_updated: DateTime<Utc>,
    /// Bumped on every versioned replace; documents written before
    /// versioning existed read as 0
    #[serde(default)]
    pub version: u64,
}

impl Goal {
    pub fn is_target_reached(&self) -> bool {
        self.current >= self.target
    }
}

impl Record for Goal {
    type Key = str;
    const COLLECTION: &'static CollectionDef = &schema::GOALS;

    fn encode_key(key: &str) -> String {
        key.to_string()
    }

    fn storage_key(&self) -> String {
        self.id.clone()
    }

    fn version(&self) -> Option<u64> {
        Some(self.version)
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Create goal request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoalRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: GoalCategory,
    #[serde(rename = "type")]
    pub period: GoalPeriod,
    pub target: f64,
    #[serde(default)]
    pub current: f64,
    pub unit: String,
    #[serde(default, with = "codec::iso8601_option")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "codec::iso8601_option")]
    pub end_date: Option<DateTime<Utc>>,
    pub priority: Priority,
}

/// Update goal request; absent fields keep their current value, and an
/// explicit `null` clears an optional one
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGoalRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "codec::nullable::deserialize")]
    pub description: Option<Option<String>>,
    pub category: Option<GoalCategory>,
    #[serde(rename = "type")]
    pub period: Option<GoalPeriod>,
    pub target: Option<f64>,
    pub current: Option<f64>,
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "codec::nullable_iso8601::deserialize")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "codec::nullable_iso8601::deserialize")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
    pub status: Option<GoalStatus>,
    pub streak: Option<u32>,
}

// ===== Habits =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HabitCategory {
    Health,
    Fitness,
    Learning,
    Productivity,
    Mindfulness,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HabitFrequency {
    Daily,
    Weekly,
    Custom,
}

/// A recurring behaviour tracked day by day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: HabitCategory,
    pub frequency: HabitFrequency,
    pub target: u32,
    pub color: String,
    pub icon: String,
    #[serde(with = "codec::iso8601")]
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Record for Habit {
    type Key = str;
    const COLLECTION: &'static CollectionDef = &schema::HABITS;
    const CASCADES: &'static [Cascade] = &[Cascade {
        collection: &schema::HABIT_RECORDS,
        index: "habitId",
    }];

    fn encode_key(key: &str) -> String {
        key.to_string()
    }

    fn storage_key(&self) -> String {
        self.id.clone()
    }
}

/// Create habit request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHabitRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: HabitCategory,
    pub frequency: HabitFrequency,
    pub target: u32,
    pub color: String,
    pub icon: String,
}

/// Update habit request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHabitRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "codec::nullable::deserialize")]
    pub description: Option<Option<String>>,
    pub category: Option<HabitCategory>,
    pub frequency: Option<HabitFrequency>,
    pub target: Option<u32>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_active: Option<bool>,
}

// ===== Habit records =====

/// Primary key of a habit record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HabitRecordKey {
    pub habit_id: String,
    pub date: NaiveDate,
}

impl HabitRecordKey {
    pub fn new(habit_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            habit_id: habit_id.into(),
            date,
        }
    }
}

/// Completion of one habit on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitRecord {
    pub habit_id: String,
    #[serde(with = "codec::calendar_date")]
    pub date: NaiveDate,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl HabitRecord {
    pub fn key(&self) -> HabitRecordKey {
        HabitRecordKey::new(self.habit_id.clone(), self.date)
    }
}

impl Record for HabitRecord {
    type Key = HabitRecordKey;
    const COLLECTION: &'static CollectionDef = &schema::HABIT_RECORDS;

    fn encode_key(key: &HabitRecordKey) -> String {
        codec::composite_key(&key.habit_id, &key.date)
    }

    fn storage_key(&self) -> String {
        codec::composite_key(&self.habit_id, &self.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_wire_format() {
        let event: Event = serde_json::from_str(
            r#"{
                "id": "e1",
                "title": "Lab report",
                "status": "in-progress",
                "type": "assignment",
                "course": "CHEM 101",
                "startTime": "2024-02-10T14:00:00.000Z",
                "description": "Section 3",
                "tags": ["lab"]
            }"#,
        )
        .unwrap();

        assert_eq!(event.status, EventStatus::InProgress);
        assert_eq!(event.kind, EventKind::Assignment);
        assert_eq!(event.start_time, Utc.with_ymd_and_hms(2024, 2, 10, 14, 0, 0).unwrap());
        assert_eq!(event.end_time, None);
        assert_eq!(event.details["description"], "Section 3");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["startTime"], "2024-02-10T14:00:00.000Z");
        assert_eq!(value["tags"][0], "lab");
        assert!(value.get("endTime").is_none());
    }

    #[test]
    fn test_update_request_distinguishes_null_from_absent() {
        let absent: UpdateGoalRequest = serde_json::from_str(r#"{"title": "Run"}"#).unwrap();
        assert_eq!(absent.end_date, None);
        assert_eq!(absent.description, None);

        let cleared: UpdateGoalRequest =
            serde_json::from_str(r#"{"endDate": null, "description": null}"#).unwrap();
        assert_eq!(cleared.end_date, Some(None));
        assert_eq!(cleared.description, Some(None));

        let set: UpdateGoalRequest =
            serde_json::from_str(r#"{"startDate": "2024-02-10T14:00:00.000Z"}"#).unwrap();
        assert_eq!(
            set.start_date,
            Some(Some(Utc.with_ymd_and_hms(2024, 2, 10, 14, 0, 0).unwrap()))
        );

        let habit: UpdateHabitRequest = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(habit.description, Some(None));
    }

    #[test]
    fn test_goal_without_version_reads_as_zero() {
        let goal: Goal = serde_json::from_str(
            r#"{
                "id": "g1",
                "title": "Run",
                "category": "fitness",
                "type": "one-time",
                "target": 42.0,
                "current": 10.5,
                "unit": "km",
                "priority": "high",
                "status": "active",
                "streak": 0,
                "lastUpdated": "2024-01-01T00:00:00.000Z"
            }"#,
        )
        .unwrap();

        assert_eq!(goal.period, GoalPeriod::OneTime);
        assert_eq!(goal.version, 0);
        assert_eq!(Record::version(&goal), Some(0));
        assert!(!goal.is_target_reached());
    }

    #[test]
    fn test_habit_record_key() {
        let record: HabitRecord = serde_json::from_str(
            r#"{"habitId":"h1","date":"2024-05-06","completed":true}"#,
        )
        .unwrap();

        assert_eq!(record.notes, None);
        assert_eq!(
            record.storage_key(),
            HabitRecord::encode_key(&HabitRecordKey::new(
                "h1",
                NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
            ))
        );

        let bad = serde_json::from_str::<HabitRecord>(
            r#"{"habitId":"h1","date":"2024-05-06T10:00:00Z","completed":true}"#,
        );
        assert!(bad.is_err());
    }
}

//! Repository layer for database operations
//!
//! Typed CRUD over each collection. Records are encoded and decoded here,
//! at the repository boundary; the engine only ever sees documents.
//! Each call runs in its own transaction scope. Deleting a record kind that
//! declares cascades removes the parent and its children in one transaction.

use super::codec::{self, IndexValue};
use super::engine;
use super::models::*;
use super::Database;
use crate::error::{Result, StoreError};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteConnection;
use std::marker::PhantomData;

pub type EventsRepository = Repository<Event>;
pub type GoalsRepository = Repository<Goal>;
pub type HabitsRepository = Repository<Habit>;
pub type HabitRecordsRepository = Repository<HabitRecord>;

/// Repository for one collection
pub struct Repository<T> {
    db: Database,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _record: PhantomData,
        }
    }
}

fn decode_all<T: Record>(docs: Vec<engine::StoredDoc>) -> Result<Vec<T>> {
    docs.iter().map(|stored| codec::decode(&stored.doc)).collect()
}

impl<T: Record> Repository<T> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Open the underlying store if it is not open yet.
    pub async fn init(&self) -> Result<()> {
        self.db.open().await?;
        Ok(())
    }

    /// Every record in the collection, in no particular order
    pub async fn get_all(&self) -> Result<Vec<T>> {
        let mut conn = self.db.open().await?.acquire().await?;
        let docs = engine::get_all(&mut conn, T::COLLECTION).await?;

        docs.iter().map(|doc| codec::decode(doc)).collect()
    }

    /// Get a record by primary key
    pub async fn get(&self, key: &T::Key) -> Result<Option<T>> {
        let mut conn = self.db.open().await?.acquire().await?;
        let doc = engine::get(&mut conn, T::COLLECTION, &T::encode_key(key)).await?;

        doc.as_deref().map(codec::decode).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let mut conn = self.db.open().await?.acquire().await?;
        engine::count(&mut conn, T::COLLECTION).await
    }

    /// Records whose indexed field equals `value`
    pub async fn get_by_index(&self, index: &str, value: impl Into<IndexValue>) -> Result<Vec<T>> {
        let value = value.into();
        let mut conn = self.db.open().await?.acquire().await?;
        let docs = engine::get_by_index(&mut conn, T::COLLECTION, index, &value).await?;

        decode_all(docs)
    }

    /// Records whose indexed field lies within the inclusive bounds, ordered by that field
    pub async fn get_by_index_range(
        &self,
        index: &str,
        lower: Option<IndexValue>,
        upper: Option<IndexValue>,
    ) -> Result<Vec<T>> {
        let mut conn = self.db.open().await?.acquire().await?;
        let docs = engine::get_by_index_range(
            &mut conn,
            T::COLLECTION,
            index,
            lower.as_ref(),
            upper.as_ref(),
        )
        .await?;

        decode_all(docs)
    }

    /// Insert or fully replace a record
    pub async fn put(&self, record: &T) -> Result<()> {
        record.check()?;
        let key = record.storage_key();
        let doc = codec::encode(record)?;

        let mut conn = self.db.open().await?.acquire().await?;
        engine::put(&mut conn, T::COLLECTION, &key, &doc).await?;

        tracing::debug!("Put {} record: {}", T::COLLECTION.name, key);
        Ok(())
    }

    /// Insert or replace several records in one transaction
    pub async fn put_many(&self, records: &[T]) -> Result<()> {
        let mut tx = self.db.open().await?.begin().await?;

        for record in records {
            record.check()?;
            let doc = codec::encode(record)?;
            engine::put(&mut tx, T::COLLECTION, &record.storage_key(), &doc).await?;
        }

        tx.commit().await?;

        tracing::debug!("Put {} {} records", records.len(), T::COLLECTION.name);
        Ok(())
    }

    /// Write an updated record, returning it as stored.
    ///
    /// For kinds that carry a version this is a compare-and-swap: the stored
    /// version must still equal the record's, and the write bumps it by one.
    /// Other kinds are upserted.
    pub async fn replace(&self, record: &T) -> Result<T> {
        let Some(expected) = record.version() else {
            self.put(record).await?;
            return Ok(record.clone());
        };
        record.check()?;

        let key = record.storage_key();
        let mut conn = self.db.open().await?.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let outcome = compare_and_swap(&mut conn, record, &key, expected).await;
        let next = finish_write(&mut conn, outcome).await?;

        tracing::debug!("Replaced {} {} at version {}", T::COLLECTION.name, key, expected + 1);
        Ok(next)
    }

    /// Delete a record by key; deleting an absent key is not an error.
    ///
    /// Children in cascading collections are removed in the same
    /// transaction, which commits only once none of them remain.
    pub async fn delete(&self, key: &T::Key) -> Result<()> {
        let key = T::encode_key(key);
        let pool = self.db.open().await?;

        if T::CASCADES.is_empty() {
            let mut conn = pool.acquire().await?;
            engine::delete(&mut conn, T::COLLECTION, &key).await?;
            tracing::debug!("Deleted {} record: {}", T::COLLECTION.name, key);
            return Ok(());
        }

        let mut tx = pool.begin().await?;

        let removed = match delete_cascading::<T>(&mut tx, &key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Cascade delete of {} {} failed: {}", T::COLLECTION.name, key, e);
                return match tx.rollback().await {
                    Ok(()) => Err(e),
                    Err(rollback) => Err(StoreError::PartialCascadeFailure {
                        collection: T::COLLECTION.name,
                        key,
                        reason: format!("{}; rollback failed: {}", e, rollback),
                    }),
                };
            }
        };

        tx.commit().await?;

        tracing::info!(
            "Deleted {} {} and {} dependent records",
            T::COLLECTION.name,
            key,
            removed
        );
        Ok(())
    }

    /// Remove every record in the collection
    pub async fn clear(&self) -> Result<u64> {
        let mut conn = self.db.open().await?.acquire().await?;
        let removed = engine::clear(&mut conn, T::COLLECTION).await?;

        tracing::info!("Cleared {} {} records", removed, T::COLLECTION.name);
        Ok(removed)
    }
}

/// Commit a write that began with `BEGIN IMMEDIATE`, or roll it back if
/// the body failed.
async fn finish_write<R>(conn: &mut SqliteConnection, outcome: Result<R>) -> Result<R> {
    match outcome {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::error!("Failed to roll back write: {}", rollback);
            }
            Err(e)
        }
    }
}

async fn compare_and_swap<T: Record>(
    conn: &mut SqliteConnection,
    record: &T,
    key: &str,
    expected: u64,
) -> Result<T> {
    let doc = engine::get(&mut *conn, T::COLLECTION, key)
        .await?
        .ok_or_else(|| StoreError::not_found(T::COLLECTION.name, key))?;
    let stored: T = codec::decode(&doc)?;
    let found = stored.version().unwrap_or_default();

    if found != expected {
        tracing::warn!(
            "Rejected stale write to {} {}: expected version {}, found {}",
            T::COLLECTION.name,
            key,
            expected,
            found
        );
        return Err(StoreError::Conflict {
            collection: T::COLLECTION.name,
            key: key.to_string(),
            expected,
            found,
        });
    }

    let mut next = record.clone();
    next.set_version(expected + 1);
    engine::put(&mut *conn, T::COLLECTION, key, &codec::encode(&next)?).await?;
    Ok(next)
}

async fn delete_cascading<T: Record>(conn: &mut SqliteConnection, key: &str) -> Result<usize> {
    engine::delete(&mut *conn, T::COLLECTION, key).await?;

    let parent = IndexValue::from(key);
    let mut removed = 0;

    for cascade in T::CASCADES {
        let children = engine::get_by_index(&mut *conn, cascade.collection, cascade.index, &parent).await?;

        for child in &children {
            if engine::delete(&mut *conn, cascade.collection, &child.key).await? {
                removed += 1;
            }
        }

        let remaining = engine::get_by_index(&mut *conn, cascade.collection, cascade.index, &parent)
            .await?
            .len();
        if remaining > 0 {
            return Err(StoreError::PartialCascadeFailure {
                collection: T::COLLECTION.name,
                key: key.to_string(),
                reason: format!("{} {} records still reference it", remaining, cascade.collection.name),
            });
        }
    }

    Ok(removed)
}

impl Repository<Habit> {
    /// Delete a habit together with all of its completion records
    pub async fn delete_habit(&self, id: &str) -> Result<()> {
        self.delete(id).await
    }

    pub async fn active_habits(&self) -> Result<Vec<Habit>> {
        self.get_by_index("isActive", true).await
    }
}

impl Repository<HabitRecord> {
    pub async fn records_for_habit(&self, habit_id: &str) -> Result<Vec<HabitRecord>> {
        self.get_by_index("habitId", habit_id).await
    }

    pub async fn records_on(&self, date: NaiveDate) -> Result<Vec<HabitRecord>> {
        self.get_by_index("date", date).await
    }

    /// Upsert the record for one habit and day
    pub async fn set_completion(
        &self,
        habit_id: &str,
        date: NaiveDate,
        completed: bool,
        notes: Option<String>,
    ) -> Result<HabitRecord> {
        let record = HabitRecord {
            habit_id: habit_id.to_string(),
            date,
            completed,
            notes,
        };

        self.put(&record).await?;
        Ok(record)
    }

    /// Flip the completion for one habit and day; a missing record becomes
    /// a completed one.
    pub async fn toggle_completion(&self, habit_id: &str, date: NaiveDate) -> Result<HabitRecord> {
        let key = HabitRecord::encode_key(&HabitRecordKey::new(habit_id, date));
        let mut conn = self.db.open().await?.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let outcome = flip_completion(&mut conn, &key, habit_id, date).await;
        let record = finish_write(&mut conn, outcome).await?;

        tracing::debug!(
            "Habit {} on {} marked {}",
            habit_id,
            codec::format_date(&date),
            if record.completed { "complete" } else { "incomplete" }
        );
        Ok(record)
    }
}

async fn flip_completion(
    conn: &mut SqliteConnection,
    key: &str,
    habit_id: &str,
    date: NaiveDate,
) -> Result<HabitRecord> {
    let collection = HabitRecord::COLLECTION;

    let record = match engine::get(&mut *conn, collection, key).await? {
        Some(doc) => {
            let mut existing: HabitRecord = codec::decode(&doc)?;
            existing.completed = !existing.completed;
            existing
        }
        None => HabitRecord {
            habit_id: habit_id.to_string(),
            date,
            completed: true,
            notes: None,
        },
    };

    engine::put(&mut *conn, collection, key, &codec::encode(&record)?).await?;
    Ok(record)
}

impl Repository<Event> {
    /// Events starting within the inclusive time window, earliest first
    pub async fn events_between(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Event>> {
        self.get_by_index_range("startTime", Some(from.into()), Some(to.into()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_event(id: &str, status: EventStatus, course: &str, day: u32) -> Event {
        Event {
            id: id.to_string(),
            title: format!("Event {}", id),
            status,
            kind: EventKind::Task,
            course: course.to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap(),
            end_time: None,
            details: serde_json::Map::new(),
        }
    }

    fn sample_goal(id: &str) -> Goal {
        Goal {
            id: id.to_string(),
            title: "Read".to_string(),
            description: None,
            category: GoalCategory::Academic,
            period: GoalPeriod::Weekly,
            target: 5.0,
            current: 0.0,
            unit: "chapters".to_string(),
            start_date: None,
            end_date: None,
            priority: Priority::Medium,
            status: GoalStatus::Active,
            streak: 0,
            last_updated: Utc::now(),
            version: 0,
        }
    }

    fn sample_habit(id: &str) -> Habit {
        Habit {
            id: id.to_string(),
            name: "Meditate".to_string(),
            description: None,
            category: HabitCategory::Mindfulness,
            frequency: HabitFrequency::Daily,
            target: 1,
            color: "#88c0d0".to_string(),
            icon: "lotus".to_string(),
            created_at: Utc::now(),
            is_active: true,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_event() {
        let repo = EventsRepository::new(Database::in_memory());

        let mut event = sample_event("e1", EventStatus::Todo, "MATH 200", 1);
        event
            .details
            .insert("description".to_string(), serde_json::json!("Problem set 4"));
        repo.put(&event).await.unwrap();

        let fetched = repo.get("e1").await.unwrap().unwrap();
        assert_eq!(fetched, event);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_without_merging() {
        let repo = EventsRepository::new(Database::in_memory());

        let mut first = sample_event("e1", EventStatus::Todo, "MATH 200", 1);
        first.details.insert("priority".to_string(), serde_json::json!("high"));
        repo.put(&first).await.unwrap();

        let second = sample_event("e1", EventStatus::Done, "HIST 110", 2);
        repo.put(&second).await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all, vec![second]);
        assert!(!all[0].details.contains_key("priority"));
    }

    #[tokio::test]
    async fn test_get_by_index() {
        let repo = EventsRepository::new(Database::in_memory());

        repo.put(&sample_event("e1", EventStatus::Todo, "MATH 200", 1)).await.unwrap();
        repo.put(&sample_event("e2", EventStatus::Done, "MATH 200", 2)).await.unwrap();
        repo.put(&sample_event("e3", EventStatus::Todo, "HIST 110", 3)).await.unwrap();

        let todo = repo
            .get_by_index("status", IndexValue::encode(&EventStatus::Todo).unwrap())
            .await
            .unwrap();
        assert_eq!(todo.len(), 2);

        let math = repo.get_by_index("course", "MATH 200").await.unwrap();
        assert_eq!(math.len(), 2);

        let result = repo.get_by_index("title", "Event e1").await;
        assert!(matches!(result, Err(StoreError::UnknownIndex { .. })));
    }

    #[tokio::test]
    async fn test_event_details_cannot_shadow_fields() {
        let repo = EventsRepository::new(Database::in_memory());

        let mut event = sample_event("e1", EventStatus::Todo, "MATH 200", 1);
        event
            .details
            .insert("status".to_string(), serde_json::json!("done"));

        let result = repo.put(&event).await;
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
        let result = repo.put_many(std::slice::from_ref(&event)).await;
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
        assert_eq!(repo.count().await.unwrap(), 0);

        event.details.remove("status");
        event
            .details
            .insert("room".to_string(), serde_json::json!("B12"));
        repo.put(&event).await.unwrap();

        let stored = repo.get("e1").await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Todo);
        assert_eq!(stored.details["room"], "B12");
    }

    #[tokio::test]
    async fn test_events_between() {
        let repo = EventsRepository::new(Database::in_memory());

        for (id, d) in [("e1", 5), ("e2", 1), ("e3", 20)] {
            repo.put(&sample_event(id, EventStatus::Todo, "X", d)).await.unwrap();
        }

        let window = repo
            .events_between(
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        let ids: Vec<&str> = window.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = GoalsRepository::new(Database::in_memory());
        repo.put(&sample_goal("g1")).await.unwrap();

        repo.delete("absent").await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);

        repo.delete("g1").await.unwrap();
        repo.delete("g1").await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_versioned_replace() {
        let repo = GoalsRepository::new(Database::in_memory());
        let goal = sample_goal("g1");
        repo.put(&goal).await.unwrap();

        let mut update = goal.clone();
        update.current = 2.0;
        let stored = repo.replace(&update).await.unwrap();
        assert_eq!(stored.version, 1);

        // A writer still holding version 0 loses
        let mut stale = goal.clone();
        stale.current = 1.0;
        let result = repo.replace(&stale).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict { expected: 0, found: 1, .. })
        ));

        let current = repo.get("g1").await.unwrap().unwrap();
        assert_eq!(current.current, 2.0);
        assert_eq!(current.version, 1);

        let missing = repo.replace(&sample_goal("nope")).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_habit_records_composite_key() {
        let records = HabitRecordsRepository::new(Database::in_memory());

        records.set_completion("h1", day(1), true, None).await.unwrap();
        records.set_completion("h1", day(1), false, None).await.unwrap();
        records
            .set_completion("h1", day(1), true, Some("evening".to_string()))
            .await
            .unwrap();
        records.set_completion("h1", day(2), true, None).await.unwrap();

        assert_eq!(records.count().await.unwrap(), 2);

        let first = records
            .get(&HabitRecordKey::new("h1", day(1)))
            .await
            .unwrap()
            .unwrap();
        assert!(first.completed);
        assert_eq!(first.notes.as_deref(), Some("evening"));

        assert_eq!(records.records_on(day(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_completion() {
        let records = HabitRecordsRepository::new(Database::in_memory());

        let toggled = records.toggle_completion("h1", day(3)).await.unwrap();
        assert!(toggled.completed);

        let toggled = records.toggle_completion("h1", day(3)).await.unwrap();
        assert!(!toggled.completed);

        assert_eq!(records.count().await.unwrap(), 1);
        assert_eq!(
            records.get_by_index("completed", false).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_habit_cascades() {
        let db = Database::in_memory();
        let habits = HabitsRepository::new(db.clone());
        let records = HabitRecordsRepository::new(db);

        habits.put(&sample_habit("h1")).await.unwrap();
        habits.put(&sample_habit("h2")).await.unwrap();
        for d in 1..=5 {
            records.set_completion("h1", day(d), true, None).await.unwrap();
        }
        records.set_completion("h2", day(1), true, None).await.unwrap();

        habits.delete_habit("h1").await.unwrap();

        assert!(habits.get("h1").await.unwrap().is_none());
        assert!(records.records_for_habit("h1").await.unwrap().is_empty());
        assert_eq!(records.records_for_habit("h2").await.unwrap().len(), 1);

        // A habit without records, and one that no longer exists
        habits.delete_habit("h2").await.unwrap();
        habits.delete_habit("h2").await.unwrap();
        assert_eq!(records.count().await.unwrap(), 0);
        assert_eq!(habits.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_habits_and_clear() {
        let habits = HabitsRepository::new(Database::in_memory());

        let mut paused = sample_habit("h2");
        paused.is_active = false;
        habits
            .put_many(&[sample_habit("h1"), paused])
            .await
            .unwrap();

        let active = habits.active_habits().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "h1");

        assert_eq!(habits.clear().await.unwrap(), 2);
        assert!(habits.get_all().await.unwrap().is_empty());
    }
}

//! Write-through state synchronizer
//!
//! Keeps an in-memory copy of one collection for synchronous reads by the
//! UI. Every mutation is committed through the repository first; the cached
//! copy changes only after the durable write succeeded. Updates are resolved
//! against the cache alone: an id the cache does not hold is `NotFound`,
//! even if the store has it.

use crate::database::{
    codec, CreateGoalRequest, CreateHabitRequest, Database, Goal, GoalStatus, Habit, Record, Repository,
    UpdateGoalRequest, UpdateHabitRequest,
};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A record kind the synchronizer can create and patch
pub trait Syncable: Record<Key = str> {
    /// Fields supplied by the caller when adding
    type Create: Send;
    /// Partial update merged onto the cached record
    type Update: Send;

    /// Human-readable name used in error messages
    const LABEL: &'static str;

    fn create(request: Self::Create, id: String, now: DateTime<Utc>) -> Self;

    fn apply(&mut self, update: Self::Update, now: DateTime<Utc>);

    fn id(&self) -> &str;

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl Syncable for Goal {
    type Create = CreateGoalRequest;
    type Update = UpdateGoalRequest;
    const LABEL: &'static str = "goal";

    fn create(req: CreateGoalRequest, id: String, now: DateTime<Utc>) -> Self {
        Goal {
            id,
            title: req.title,
            description: req.description,
            category: req.category,
            period: req.period,
            target: req.target,
            current: req.current,
            unit: req.unit,
            start_date: req.start_date,
            end_date: req.end_date,
            priority: req.priority,
            status: GoalStatus::Active,
            streak: 0,
            last_updated: now,
            version: 0,
        }
    }

    fn apply(&mut self, update: UpdateGoalRequest, now: DateTime<Utc>) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(period) = update.period {
            self.period = period;
        }
        if let Some(target) = update.target {
            self.target = target;
        }
        if let Some(current) = update.current {
            self.current = current;
        }
        if let Some(unit) = update.unit {
            self.unit = unit;
        }
        if let Some(start_date) = update.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = update.end_date {
            self.end_date = end_date;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(streak) = update.streak {
            self.streak = streak;
        }
        self.last_updated = now;
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        if !(self.target > 0.0) {
            return Err(StoreError::InvalidRecord(format!(
                "Goal target must be positive, got {}",
                self.target
            )));
        }
        if !(self.current >= 0.0) {
            return Err(StoreError::InvalidRecord(format!(
                "Goal progress cannot be negative, got {}",
                self.current
            )));
        }
        Ok(())
    }
}

impl Syncable for Habit {
    type Create = CreateHabitRequest;
    type Update = UpdateHabitRequest;
    const LABEL: &'static str = "habit";

    fn create(req: CreateHabitRequest, id: String, now: DateTime<Utc>) -> Self {
        Habit {
            id,
            name: req.name,
            description: req.description,
            category: req.category,
            frequency: req.frequency,
            target: req.target,
            color: req.color,
            icon: req.icon,
            created_at: now,
            is_active: true,
        }
    }

    fn apply(&mut self, update: UpdateHabitRequest, _now: DateTime<Utc>) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
        if let Some(target) = update.target {
            self.target = target;
        }
        if let Some(color) = update.color {
            self.color = color;
        }
        if let Some(icon) = update.icon {
            self.icon = icon;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Observable state of a synchronizer
#[derive(Debug, Clone)]
pub struct SyncState<T> {
    pub items: Vec<T>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub initialized: bool,
}

impl<T> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            is_loading: false,
            error: None,
            initialized: false,
        }
    }
}

pub type GoalsSynchronizer = Synchronizer<Goal>;
pub type HabitsSynchronizer = Synchronizer<Habit>;

/// Write-through cache over one collection
pub struct Synchronizer<T: Syncable> {
    repo: Repository<T>,
    state: Arc<RwLock<SyncState<T>>>,
}

impl<T: Syncable> Clone for Synchronizer<T> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Syncable> Synchronizer<T> {
    pub fn new(repo: Repository<T>) -> Self {
        Self {
            repo,
            state: Arc::new(RwLock::new(SyncState::default())),
        }
    }

    pub fn from_database(db: Database) -> Self {
        Self::new(Repository::new(db))
    }

    pub fn repository(&self) -> &Repository<T> {
        &self.repo
    }

    // ===== Readable state =====

    pub async fn items(&self) -> Vec<T> {
        self.state.read().await.items.clone()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.state
            .read()
            .await
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    pub async fn snapshot(&self) -> SyncState<T> {
        self.state.read().await.clone()
    }

    // ===== Operations =====

    /// Replace the cache with the stored collection.
    ///
    /// On failure the previous cache is kept and the error recorded; the
    /// synchronizer still counts as initialized.
    pub async fn load(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.is_loading = true;
            state.error = None;
        }

        let result = self.repo.get_all().await;

        let mut state = self.state.write().await;
        state.is_loading = false;
        state.initialized = true;

        match result {
            Ok(items) => {
                tracing::debug!("Loaded {} {} records", items.len(), T::LABEL);
                state.items = items;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load {}s: {}", T::LABEL, e);
                state.error = Some(format!("Failed to load {}s: {}", T::LABEL, e));
                Err(e)
            }
        }
    }

    /// Create a record with a fresh id and add it once it is stored
    pub async fn add(&self, request: T::Create) -> Result<T> {
        let record = T::create(request, Uuid::new_v4().to_string(), codec::now());

        let written = match record.validate() {
            Ok(()) => self.repo.put(&record).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            return Err(self.fail("add", e).await);
        }

        let mut state = self.state.write().await;
        state.items.push(record.clone());
        state.error = None;

        tracing::info!("Added {} {}", T::LABEL, record.id());
        Ok(record)
    }

    /// Merge a partial update onto the cached record and store the result
    pub async fn update(&self, id: &str, update: T::Update) -> Result<T> {
        let Some(mut merged) = self.get(id).await else {
            return Err(self.fail("update", StoreError::not_found(T::COLLECTION.name, id)).await);
        };

        merged.apply(update, codec::now());

        let written = match merged.validate() {
            Ok(()) => self.repo.replace(&merged).await,
            Err(e) => Err(e),
        };

        let stored = match written {
            Ok(stored) => stored,
            Err(e) => return Err(self.fail("update", e).await),
        };

        let mut state = self.state.write().await;
        if let Some(slot) = state.items.iter_mut().find(|item| item.id() == id) {
            *slot = stored.clone();
        }
        state.error = None;

        tracing::debug!("Updated {} {}", T::LABEL, id);
        Ok(stored)
    }

    /// Delete from the store, then drop from the cache
    pub async fn delete(&self, id: &str) -> Result<()> {
        if let Err(e) = self.repo.delete(id).await {
            return Err(self.fail("delete", e).await);
        }

        let mut state = self.state.write().await;
        state.items.retain(|item| item.id() != id);
        state.error = None;

        tracing::info!("Deleted {} {}", T::LABEL, id);
        Ok(())
    }

    /// Record a failed mutation; the cache is left untouched.
    async fn fail(&self, action: &str, error: StoreError) -> StoreError {
        tracing::error!("Failed to {} {}: {}", action, T::LABEL, error);

        let mut state = self.state.write().await;
        state.is_loading = false;
        state.error = Some(format!("Failed to {} {}: {}", action, T::LABEL, error));

        error
    }
}

//! Legacy migration service
//!
//! Moves the flat, single-blob event list into the indexed events
//! collection. Runs once at startup, before anything reads events.
//!
//! The only idempotence guard is "the events collection is empty". A run
//! interrupted mid-import leaves the blob in place and some events stored;
//! the next run then sees a non-empty collection and skips the rest.

use crate::config::LEGACY_EVENTS_KEY;
use crate::database::{codec, Event, EventsRepository};
use crate::storage::LegacyStore;

/// Outcome of one migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationReport {
    /// No blob, an empty blob, or a blob that is not a list
    NoLegacyData,
    /// The events collection already holds data
    AlreadyMigrated,
    Migrated { imported: usize, skipped: usize },
    /// The store or the legacy blob could not be accessed
    Failed(String),
}

impl MigrationReport {
    /// Whether an import actually took place
    pub fn succeeded(&self) -> bool {
        matches!(self, MigrationReport::Migrated { .. })
    }
}

/// Service importing legacy events into the indexed store
#[derive(Clone)]
pub struct MigrationService {
    events: EventsRepository,
    legacy: LegacyStore,
    key: String,
}

impl MigrationService {
    pub fn new(events: EventsRepository, legacy: LegacyStore) -> Self {
        Self {
            events,
            legacy,
            key: LEGACY_EVENTS_KEY.to_string(),
        }
    }

    /// Read the legacy list from a different key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Run the migration
    pub async fn migrate(&self) -> MigrationReport {
        let records = match self.read_legacy_records().await {
            Ok(Some(records)) => records,
            Ok(None) => {
                tracing::debug!("No legacy events to migrate");
                return MigrationReport::NoLegacyData;
            }
            Err(e) => {
                tracing::error!("Failed to read legacy events: {}", e);
                return MigrationReport::Failed(e.to_string());
            }
        };

        match self.events.count().await {
            Ok(0) => {}
            Ok(existing) => {
                tracing::info!(
                    "Skipping legacy migration: {} events already stored",
                    existing
                );
                return MigrationReport::AlreadyMigrated;
            }
            Err(e) => {
                tracing::error!("Legacy migration aborted, store unavailable: {}", e);
                return MigrationReport::Failed(e.to_string());
            }
        }

        tracing::info!("Migrating {} legacy events", records.len());

        let mut imported = 0;
        let mut skipped = 0;

        for (position, value) in records.into_iter().enumerate() {
            let event: Event = match codec::decode_value(value) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Skipping malformed legacy event #{}: {}", position, e);
                    skipped += 1;
                    continue;
                }
            };

            match self.events.put(&event).await {
                Ok(()) => imported += 1,
                Err(e) => {
                    tracing::warn!("Failed to import legacy event {}: {}", event.id, e);
                    skipped += 1;
                }
            }
        }

        if let Err(e) = self.legacy.remove(&self.key).await {
            tracing::warn!("Migrated events but could not remove legacy blob: {}", e);
        }

        tracing::info!(
            "Legacy migration complete: {} imported, {} skipped",
            imported,
            skipped
        );

        MigrationReport::Migrated { imported, skipped }
    }

    /// The legacy list, or `None` when there is nothing to migrate
    async fn read_legacy_records(&self) -> crate::error::Result<Option<Vec<serde_json::Value>>> {
        let Some(blob) = self.legacy.read(&self.key).await? else {
            return Ok(None);
        };

        if blob.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Vec<serde_json::Value>>(&blob) {
            Ok(records) if !records.is_empty() => Ok(Some(records)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!("Legacy blob '{}' is not a list, ignoring: {}", self.key, e);
                Ok(None)
            }
        }
    }
}

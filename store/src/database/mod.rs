//! Database module
//!
//! This module provides all database functionality including:
//! - Schema versions and upgrades
//! - Storage codec and model definitions
//! - The document storage engine
//! - Typed repositories over each collection

pub mod codec;
pub mod engine;
pub mod models;
pub mod repository;
pub mod schema;

pub use codec::IndexValue;
pub use models::*;
pub use repository::{
    EventsRepository, GoalsRepository, HabitRecordsRepository, HabitsRepository, Repository,
};
pub use schema::initialize_database;

use crate::config::{StoreConfig, StoreLocation, BUSY_TIMEOUT};
use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Build connection options shared by migration and application connections.
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(BUSY_TIMEOUT)
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true)
        },
    )
}

/// Open a connection pool for the configured store and bring its schema
/// up to the configured version.
///
/// For file stores, upgrades run on a dedicated single-connection pool
/// that is closed before the application pool is created, so no pooled
/// connection ever sees a half-upgraded schema.
pub async fn create_pool(config: &StoreConfig) -> Result<SqlitePool> {
    match &config.location {
        StoreLocation::File(db_path) => {
            tracing::info!("Creating database connection pool at: {:?}", db_path);

            // Ensure parent directory exists
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let migration_pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(connect_options(db_path)?)
                .await?;

            let upgraded = initialize_database(&migration_pool, config.schema_version).await;
            migration_pool.close().await;
            upgraded?;

            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(connect_options(db_path)?)
                .await?;

            tracing::info!("Database pool created successfully");
            Ok(pool)
        }
        StoreLocation::Memory => {
            tracing::debug!("Creating in-memory database");

            // The database lives exactly as long as its only connection
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
                .await?;

            initialize_database(&pool, config.schema_version).await?;
            Ok(pool)
        }
    }
}

struct DatabaseInner {
    config: StoreConfig,
    pool: OnceCell<SqlitePool>,
}

/// Handle to the durable store.
///
/// Cheap to clone; every clone shares one pool. The pool is opened on first
/// use and never reopened, so `open` may be called any number of times.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                pool: OnceCell::new(),
            }),
        }
    }

    /// Private in-memory store at the latest schema version.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.pool.initialized()
    }

    /// Open the store (creating and upgrading it if needed) or return the
    /// already-open pool.
    pub async fn open(&self) -> Result<&SqlitePool> {
        self.inner
            .pool
            .get_or_try_init(|| async {
                create_pool(&self.inner.config).await.map_err(|e| {
                    tracing::error!("Failed to open store: {}", e);
                    match e {
                        StoreError::StorageUnavailable(_) => e,
                        other => StoreError::StorageUnavailable(other.to_string()),
                    }
                })
            })
            .await
    }

    /// Schema version recorded in the open store.
    pub async fn schema_version(&self) -> Result<u32> {
        schema::current_version(self.open().await?).await
    }

    /// Close the pool. Operations issued afterwards fail with a storage error.
    pub async fn close(&self) {
        if let Some(pool) = self.inner.pool.get() {
            pool.close().await;
            tracing::info!("Database closed");
        }
    }
}

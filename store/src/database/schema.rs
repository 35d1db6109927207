//! Database schema and versioned upgrades
//!
//! Every collection is a document table keyed by its primary key, with one
//! SQLite expression index per declared secondary index. Schema versions
//! are declared in code and applied forward-only.

use crate::config::LATEST_SCHEMA_VERSION;
use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;

/// A named collection and its secondary indexes.
#[derive(Debug, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: &'static str,
    /// Index names; each one indexes the document field of the same name.
    pub indexes: &'static [&'static str],
}

pub const EVENTS: CollectionDef = CollectionDef {
    name: "events",
    indexes: &["status", "type", "startTime", "course"],
};

pub const GOALS: CollectionDef = CollectionDef {
    name: "goals",
    indexes: &["status", "category", "type"],
};

pub const HABITS: CollectionDef = CollectionDef {
    name: "habits",
    indexes: &["category", "isActive"],
};

pub const HABIT_RECORDS: CollectionDef = CollectionDef {
    name: "habit_records",
    indexes: &["habitId", "date", "completed"],
};

/// Collections introduced at each schema version, oldest first.
const SCHEMA_VERSIONS: &[(u32, &[&CollectionDef])] = &[
    (1, &[&EVENTS]),
    (2, &[&GOALS, &HABITS, &HABIT_RECORDS]),
];

impl CollectionDef {
    /// SQL expression a declared index is built on.
    pub fn index_expr(&self, index: &str) -> Result<String> {
        if !self.indexes.contains(&index) {
            return Err(StoreError::UnknownIndex {
                collection: self.name,
                index: index.to_string(),
            });
        }
        Ok(format!("json_extract(doc, '$.{}')", index))
    }

    fn create_statements(&self) -> Vec<String> {
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, doc TEXT NOT NULL)",
            self.name
        )];

        for index in self.indexes {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} (json_extract(doc, '$.{}'))",
                self.name,
                index.to_lowercase(),
                self.name,
                index
            ));
        }

        statements
    }
}

/// Bring the store up to `desired_version`, returning the version now recorded.
///
/// Runs on a single connection. The upgrade holds SQLite's write lock
/// (`BEGIN IMMEDIATE`) for its whole duration, so a second process opening
/// the same file waits instead of interleaving.
pub async fn initialize_database(pool: &SqlitePool, desired_version: u32) -> Result<u32> {
    if desired_version > LATEST_SCHEMA_VERSION {
        return Err(StoreError::StorageUnavailable(format!(
            "Schema version {} is newer than supported version {}",
            desired_version, LATEST_SCHEMA_VERSION
        )));
    }

    let mut conn = pool.acquire().await?;

    let current_version = read_version(&mut conn).await?;
    tracing::info!("Current database version: {}", current_version);

    if current_version >= desired_version {
        return Ok(current_version);
    }

    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    match apply_upgrade(&mut conn, desired_version).await {
        Ok(version) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            tracing::info!("Database upgraded to version {}", version);
            Ok(version)
        }
        Err(e) => {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::error!("Failed to roll back schema upgrade: {}", rollback);
            }
            Err(e)
        }
    }
}

async fn apply_upgrade(conn: &mut SqliteConnection, desired_version: u32) -> Result<u32> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    // Another process may have finished the upgrade while we waited for the lock
    let current_version = read_version(conn).await?;
    if current_version >= desired_version {
        return Ok(current_version);
    }

    let pending: Vec<u32> = SCHEMA_VERSIONS
        .iter()
        .map(|(version, _)| *version)
        .filter(|version| *version > current_version && *version <= desired_version)
        .collect();

    for (version, collections) in SCHEMA_VERSIONS {
        if !pending.contains(version) {
            continue;
        }

        tracing::info!("Applying schema version {}", version);

        for collection in collections.iter() {
            for statement in collection.create_statements() {
                sqlx::query(&statement).execute(&mut *conn).await?;
            }
        }
    }

    // Recording the version is the last step of the same transaction
    for version in &pending {
        sqlx::query("INSERT OR IGNORE INTO migrations (version) VALUES (?)")
            .bind(*version as i64)
            .execute(&mut *conn)
            .await?;
    }

    Ok(desired_version)
}

async fn read_version(conn: &mut SqliteConnection) -> Result<u32> {
    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'migrations'",
    )
    .fetch_one(&mut *conn)
    .await?;

    if tables == 0 {
        return Ok(0);
    }

    let version: i64 = sqlx::query("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(&mut *conn)
        .await?
        .get(0);

    Ok(version as u32)
}

/// Version currently recorded in the store (0 for a fresh store).
pub async fn current_version(pool: &SqlitePool) -> Result<u32> {
    let mut conn = pool.acquire().await?;
    read_version(&mut conn).await
}

/// Look up a collection declared at any schema version.
pub fn collection(name: &str) -> Option<&'static CollectionDef> {
    SCHEMA_VERSIONS
        .iter()
        .flat_map(|(_, collections)| collections.iter().copied())
        .find(|collection| collection.name == name)
}

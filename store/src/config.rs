//! Store configuration
//!
//! Central location for configuration constants and the `StoreConfig`
//! used to open the durable store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ===== Schema =====

/// Schema version this build of the store expects on disk.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// Default database file name inside the application data directory.
pub const DATABASE_FILE_NAME: &str = "planner.db";

// ===== Connection Pool =====

/// Maximum number of pooled connections for file-backed stores.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on SQLite's lock before giving up.
/// Covers other processes holding the lock during a schema upgrade.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ===== Legacy Data =====

/// Key under which the pre-index flat event list was stored.
pub const LEGACY_EVENTS_KEY: &str = "planner-events";

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum StoreLocation {
    File(PathBuf),
    /// Private in-memory database (tests and throwaway sessions)
    Memory,
}

/// Options for opening the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub location: StoreLocation,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_schema_version() -> u32 {
    LATEST_SCHEMA_VERSION
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl StoreConfig {
    /// Store backed by the database file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            schema_version: LATEST_SCHEMA_VERSION,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Store inside an application data directory, using the default file name.
    pub fn in_dir(app_data_dir: impl Into<PathBuf>) -> Self {
        Self::file(app_data_dir.into().join(DATABASE_FILE_NAME))
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            schema_version: LATEST_SCHEMA_VERSION,
            // An in-memory database exists per connection
            max_connections: 1,
        }
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"location":{"kind":"file","path":"/tmp/p.db"}}"#).unwrap();

        assert_eq!(config.location, StoreLocation::File(PathBuf::from("/tmp/p.db")));
        assert_eq!(config.schema_version, LATEST_SCHEMA_VERSION);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_in_dir_uses_default_file_name() {
        let config = StoreConfig::in_dir("/data/planner");
        assert_eq!(
            config.location,
            StoreLocation::File(PathBuf::from("/data/planner").join(DATABASE_FILE_NAME))
        );
    }
}

//! Services module
//!
//! Coordination between the UI layer and the repositories: the one-time
//! legacy migration and the write-through synchronizers.

pub mod migration;
pub mod synchronizer;

pub use migration::{MigrationReport, MigrationService};
pub use synchronizer::{GoalsSynchronizer, HabitsSynchronizer, SyncState, Syncable, Synchronizer};

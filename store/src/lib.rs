//! Planner store library
//!
//! Local persistent storage for the planner: a versioned SQLite document
//! store holding events, goals, habits and habit records, typed repositories
//! over it, write-through synchronizers for the UI, and the one-time import
//! of the legacy flat event list.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod services;
pub mod storage;

pub use config::StoreConfig;
pub use database::Database;
pub use error::{Result, StoreError};

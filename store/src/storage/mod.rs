//! Storage module
//!
//! Provides file storage for data kept outside the indexed database.

pub mod legacy_store;

pub use legacy_store::LegacyStore;

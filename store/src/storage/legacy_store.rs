//! Legacy key/value storage
//!
//! Before the indexed store existed, the planner kept each piece of state
//! as one serialized blob under a well-known key. This store reads and
//! removes those blobs; each key maps to the file "<root>/<key>.json".

use crate::error::{Result, StoreError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// File-backed store of serialized legacy blobs
#[derive(Clone)]
pub struct LegacyStore {
    root: PathBuf,
}

impl LegacyStore {
    /// Create a legacy store rooted at the given directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Initialize the legacy store (create directory if needed)
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Legacy store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Read the blob under `key`, if any
    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.get_path(key)?;

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;

        tracing::debug!("Read legacy blob: {} ({} bytes)", key, content.len());

        Ok(Some(content))
    }

    /// Write a blob under `key`, replacing any previous value
    pub async fn write(&self, key: &str, content: &str) -> Result<()> {
        let path = self.get_path(key)?;

        fs::create_dir_all(&self.root).await?;

        // Write to temp file first (atomic write)
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;

        // Rename to final location
        fs::rename(temp_path, &path).await?;

        tracing::debug!("Wrote legacy blob: {} ({} bytes)", key, content.len());

        Ok(())
    }

    /// Check if a blob exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.get_path(key)?;
        Ok(path.exists())
    }

    /// Remove a blob
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.get_path(key)?;

        if !path.exists() {
            return Ok(()); // Already removed
        }

        fs::remove_file(&path).await?;

        tracing::debug!("Removed legacy blob: {}", key);

        Ok(())
    }

    /// Get file path for a key
    fn get_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(StoreError::InvalidRecord(format!("Invalid legacy key: {:?}", key)));
        }

        Ok(self.root.join(format!("{}.json", key)))
    }

    /// Get legacy store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

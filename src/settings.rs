/// Persisted key-value settings
///
/// The threshold is the only persisted value, but stores are keyed so the
/// same file can hold more settings later.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Setting not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt settings file: {0}")]
    Corrupt(String),
}

/// Loads and saves integer settings across restarts
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<i32, StorageError>;

    async fn save(&self, key: &str, value: i32) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct SettingsDocument {
    values: BTreeMap<String, i32>,
}

/// Settings kept in a JSON file.
///
/// Saves rewrite the whole document into a temporary file and rename it
/// over the old one.
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<SettingsDocument, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SettingsDocument::default())
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self, key: &str) -> Result<i32, StorageError> {
        let document = self.read_document().await?;
        document
            .values
            .get(key)
            .copied()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn save(&self, key: &str, value: i32) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        // A corrupt file is replaced rather than blocking every future save
        let mut document = match self.read_document().await {
            Ok(document) => document,
            Err(StorageError::Corrupt(reason)) => {
                debug!("Replacing corrupt settings file: {}", reason);
                SettingsDocument::default()
            }
            Err(e) => return Err(e),
        };
        document.values.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!("Saved {}={} to {}", key, value, self.path.display());
        Ok(())
    }
}

/// Settings kept in memory only
#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, i32>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: i32) -> Self {
        let store = Self::new();
        store.values.lock().insert(key.to_string(), value);
        store
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self, key: &str) -> Result<i32, StorageError> {
        self.values
            .lock()
            .get(key)
            .copied()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn save(&self, key: &str, value: i32) -> Result<(), StorageError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

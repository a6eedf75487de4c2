use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use anyhow::{Context, Result};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Small string key/value store persisted as one JSON object, in the spirit
/// of a browser's `localStorage`. Every write is flushed to disk.
pub struct LocalStorage {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl LocalStorage {
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read local storage from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!(
                    "local storage at {} is unreadable ({}); starting empty",
                    path.display(),
                    err
                );
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), value.into());
        self.persist(&guard)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if guard.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write local storage to {}", self.path.display()))
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Synchronous string key-value persistence.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError>;
}

#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Keeps every key in one JSON object file, rewritten through a temp file and rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "storage unreadable");
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "storage corrupted");
                BTreeMap::new()
            }
        }
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_all().remove(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        let mut values = self.read_all();
        values.insert(key.to_string(), value);
        let text = serde_json::to_string_pretty(&values)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, format!("{text}\n")).map_err(|err| self.io_error(err))?;
        fs::rename(&staging, &self.path).map_err(|err| self.io_error(err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_values() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("k"), None);
        store.set("k", "v".to_string()).expect("set");
        assert_eq!(store.get("k"), Some("v".to_string()));
    }

    #[test]
    fn file_store_keeps_other_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.json");
        let mut store = JsonFileStore::new(&path);

        store.set("a", "1".to_string()).expect("set a");
        store.set("b", "2".to_string()).expect("set b");

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("a"), Some("1".to_string()));
        assert_eq!(reopened.get("b"), Some("2".to_string()));
        assert!(!dir.path().join("nested").join("store.json.tmp").exists());
    }

    #[test]
    fn corrupted_file_reads_as_empty_and_is_replaced_on_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").expect("write garbage");

        let mut store = JsonFileStore::new(&path);
        assert_eq!(store.get("a"), None);
        store.set("a", "1".to_string()).expect("set");
        assert_eq!(store.get("a"), Some("1".to_string()));
    }
}

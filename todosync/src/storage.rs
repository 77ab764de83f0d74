//! The persistent key/value store and its typed accessors.
//!
//! Storage is the only resource shared between the page and the worker, and
//! the page owns it: the worker reaches it through the bridge
//! ([`GET_STORAGE`](crate::messages::PageBound) / `SET_STORAGE`) and keeps a
//! shadow cache for the periods when no page is connected.
//!
//! Durability is best effort. A value that fails to parse on load is reset
//! to the empty collection and logged, never surfaced as an error.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Persisted task list (`Vec<Task>`).
pub const TASKS_KEY: &str = "tasks";
/// Persisted reminder list (`Vec<PendingNotification>`).
pub const PENDING_NOTIFICATIONS_KEY: &str = "pendingNotifications";
/// Persisted offline mutation queue (`Vec<QueuedAction>`).
pub const PENDING_ACTIONS_KEY: &str = "pendingActions";
/// Actions that failed replay too many times (`Vec<QueuedAction>`).
pub const DEAD_LETTER_KEY: &str = "deadLetterActions";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// String key/value storage, the `localStorage` seam.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_owned(), value.to_owned());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
        Ok(())
    }
}

/// File-backed store: the whole map lives in one JSON file, loaded on open
/// and rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts empty; an unreadable
    /// one is reset to empty with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(err) => {
                    log::warn!("store at {} is unreadable, starting empty: {err}", path.display());
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(FileStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string(entries)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(());
        };
        entries.insert(key.to_owned(), value.to_owned());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(());
        };
        entries.remove(key);
        self.flush(&entries)
    }
}

/// Load a JSON-encoded list from `key`. Absent or corrupt values yield an
/// empty list; corruption is logged.
pub fn load_list<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    let Some(raw) = store.get(key) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(list) => list,
        Err(err) => {
            log::warn!("stored {key} is unreadable, resetting to empty: {err}");
            Vec::new()
        }
    }
}

/// Persist a list as JSON under `key`.
pub fn save_list<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    list: &[T],
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(list)?;
    store.set(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.set("k", "v").expect("set");
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.remove("k").expect("remove");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_task_list_round_trip() {
        let store = MemoryStore::new();
        for count in [0usize, 1, 3] {
            let tasks: Vec<Task> = (0..count)
                .map(|i| Task::new(format!("task {i}"), (i % 2 == 0).then_some(1000 + i as i64)))
                .collect();
            save_list(&store, TASKS_KEY, &tasks).expect("save");
            let loaded: Vec<Task> = load_list(&store, TASKS_KEY);
            assert_eq!(loaded, tasks);
        }
    }

    #[test]
    fn test_corrupt_value_resets_to_empty() {
        let store = MemoryStore::new();
        store.set(TASKS_KEY, "{not json").expect("set");
        let loaded: Vec<Task> = load_list(&store, TASKS_KEY);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_absent_key_loads_empty() {
        let store = MemoryStore::new();
        let loaded: Vec<Task> = load_list(&store, "missing");
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).expect("open");
        let tasks = vec![Task::new("persisted", Some(1234))];
        save_list(&store, TASKS_KEY, &tasks).expect("save");
        drop(store);

        let reopened = FileStore::open(&path).expect("reopen");
        let loaded: Vec<Task> = load_list(&reopened, TASKS_KEY);
        assert_eq!(loaded, tasks);
    }

    #[test]
    fn test_file_store_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, "garbage").expect("write");

        let store = FileStore::open(&path).expect("open");
        assert_eq!(store.get(TASKS_KEY), None);
    }
}

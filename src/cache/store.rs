//! Persistent key → entry store backing the cache
//!
//! The whole store lives in one JSON file shaped as
//! `{ "<key>": ["<timestamp>", <payload>] }`. It is read once and rewritten
//! after every change.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::timestamp;

/// File name used inside the cache directory
pub const STORE_FILE_NAME: &str = "weather_cache.json";

/// Errors reading or writing the persisted store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file or its directory could not be read or written
    #[error("Cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but is not a valid store
    #[error("Cache file {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory store could not be encoded
    #[error("Failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single cached payload
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Key the payload was fetched under
    pub key: String,
    /// Raw payload from the remote source
    pub value: Value,
    /// When the payload was stored
    pub stored_at: DateTime<Utc>,
}

/// On-disk form of an entry: a two-element `[timestamp, payload]` array
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry(#[serde(with = "timestamp")] DateTime<Utc>, Value);

/// In-memory copy of the persisted store
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl Store {
    /// Returns the XDG-compliant default store location
    ///
    /// `~/.cache/wxcache/weather_cache.json` on Linux. Returns `None` when no
    /// home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "wxcache")?;
        Some(project_dirs.cache_dir().join(STORE_FILE_NAME))
    }

    /// Creates an empty store that will persist to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the store from `path`
    ///
    /// A missing file is an empty store. Anything else that prevents reading
    /// the file, or a file that does not parse, is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let persisted: BTreeMap<String, PersistedEntry> = match serde_json::from_str(&content) {
            Ok(persisted) => persisted,
            Err(source) => return Err(StoreError::Parse { path, source }),
        };

        let entries = persisted
            .into_iter()
            .map(|(key, PersistedEntry(stored_at, value))| {
                let entry = CacheEntry {
                    key: key.clone(),
                    value,
                    stored_at,
                };
                (key, entry)
            })
            .collect();

        Ok(Self { path, entries })
    }

    /// Path the store persists to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up the entry for `key`
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Inserts `entry`, replacing any previous entry for the same key
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    /// Removes the entry for `key`
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Iterates entries in key order
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the store to disk
    ///
    /// Creates the parent directory when missing, writes a uniquely named
    /// sibling temp file, then renames it over the target. Concurrent writers
    /// never share a temp file; the last rename wins.
    pub fn persist(&self) -> Result<(), StoreError> {
        let persisted: BTreeMap<&str, PersistedEntry> = self
            .entries
            .iter()
            .map(|(key, entry)| {
                (
                    key.as_str(),
                    PersistedEntry(entry.stored_at, entry.value.clone()),
                )
            })
            .collect();

        let json = serde_json::to_string_pretty(&persisted)?;

        let dir = match self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;
                dir
            }
            None => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(&self.tmp_prefix())
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|source| self.io_error(source))?;
        tmp.write_all(json.as_bytes())
            .map_err(|source| self.io_error(source))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;
        Ok(())
    }

    fn tmp_prefix(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| STORE_FILE_NAME.to_string());
        format!(".{name}.")
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::empty(temp_dir.path().join(STORE_FILE_NAME));
        (store, temp_dir)
    }

    fn entry(key: &str, value: Value, stored_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value,
            stored_at,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::load(temp_dir.path().join("absent.json")).expect("Load should succeed");
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_creates_file_with_array_entries() {
        let (mut store, temp_dir) = create_test_store();
        store.put(entry("Paris", json!({"name": "Paris"}), noon()));

        store.persist().expect("Persist should succeed");

        let content = fs::read_to_string(temp_dir.path().join(STORE_FILE_NAME))
            .expect("Should read file");
        let raw: Value = serde_json::from_str(&content).expect("Valid JSON");
        assert_eq!(raw["Paris"][0], "2026-01-15T12:00:00Z");
        assert_eq!(raw["Paris"][1]["name"], "Paris");
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .expect("Should list directory")
            .map(|e| e.expect("Should read entry").file_name())
            .collect();
        assert_eq!(leftovers, [STORE_FILE_NAME], "No temp files should remain");
    }

    #[test]
    fn test_persist_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested = temp_dir.path().join("nested").join("cache").join(STORE_FILE_NAME);
        let mut store = Store::empty(&nested);
        store.put(entry("Oslo", json!(1), noon()));

        store.persist().expect("Persist should succeed");

        assert!(nested.exists(), "Store file should be created");
    }

    #[test]
    fn test_concurrent_persists_leave_a_valid_file() {
        let (store, temp_dir) = create_test_store();
        let path = store.path().to_path_buf();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut store = Store::empty(path);
                    store.put(entry(&format!("writer-{i}"), json!(i), noon()));
                    for _ in 0..20 {
                        store.persist().expect("Persist should succeed");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("Writer thread panicked");
        }

        let loaded = Store::load(&path).expect("Load should succeed");
        assert_eq!(loaded.len(), 1, "Last writer's store should win whole");
        let stray = fs::read_dir(temp_dir.path())
            .expect("Should list directory")
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name() != STORE_FILE_NAME)
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(stray, 0, "No temp files should remain");
    }

    #[test]
    fn test_load_after_persist_is_identical() {
        let (mut store, _temp_dir) = create_test_store();
        store.put(entry("Paris", json!({"temp": 12.5}), noon()));
        store.put(entry("paris ", json!([1, 2, 3]), noon() - Duration::minutes(45)));
        store.persist().expect("Persist should succeed");

        let loaded = Store::load(store.path()).expect("Load should succeed");
        let original: Vec<_> = store.iter().cloned().collect();
        let reloaded: Vec<_> = loaded.iter().cloned().collect();
        assert_eq!(original, reloaded);
    }

    #[test]
    fn test_reload_and_persist_without_changes_is_stable() {
        let (mut store, _temp_dir) = create_test_store();
        store.put(entry("a", json!({"x": null}), noon()));
        store.persist().expect("Persist should succeed");
        let first = fs::read_to_string(store.path()).expect("Should read file");

        let loaded = Store::load(store.path()).expect("Load should succeed");
        loaded.persist().expect("Persist should succeed");
        let second = fs::read_to_string(store.path()).expect("Should read file");

        assert_eq!(first, second);
    }

    #[test]
    fn test_load_accepts_naive_timestamps() {
        let (store, _temp_dir) = create_test_store();
        fs::write(
            store.path(),
            r#"{"London": ["2024-07-15T10:30:00.123456", {"cod": 200}]}"#,
        )
        .expect("Should write file");

        let loaded = Store::load(store.path()).expect("Load should succeed");
        let london = loaded.get("London").expect("Entry should exist");
        assert_eq!(london.value["cod"], 200);
        assert_eq!(london.key, "London");
    }

    #[test]
    fn test_load_corrupt_file_is_parse_error() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.path(), "not json").expect("Should write file");

        let result = Store::load(store.path());
        assert!(matches!(result, Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_load_rejects_bad_timestamp() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.path(), r#"{"Rome": ["soon", {}]}"#).expect("Should write file");

        assert!(matches!(Store::load(store.path()), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_load_directory_is_io_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = Store::load(temp_dir.path());
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_put_overwrites_existing_entry() {
        let (mut store, _temp_dir) = create_test_store();
        store.put(entry("Paris", json!("first"), noon()));
        let previous = store.put(entry("Paris", json!("second"), noon() + Duration::hours(1)));

        assert_eq!(previous.map(|e| e.value), Some(json!("first")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Paris").map(|e| &e.value), Some(&json!("second")));
    }

    #[test]
    fn test_keys_are_case_and_whitespace_sensitive() {
        let (mut store, _temp_dir) = create_test_store();
        store.put(entry("Paris", json!(1), noon()));
        store.put(entry("paris", json!(2), noon()));
        store.put(entry("Paris ", json!(3), noon()));

        assert_eq!(store.len(), 3);
        assert!(store.get("PARIS").is_none());
    }

    #[test]
    fn test_remove_drops_entry() {
        let (mut store, _temp_dir) = create_test_store();
        store.put(entry("Paris", json!(1), noon()));

        assert!(store.remove("Paris").is_some());
        assert!(store.remove("Paris").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Some(path) = Store::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("wxcache"), "Path should contain project name");
            assert!(path_str.ends_with(STORE_FILE_NAME));
        }
        // Passes if there is no home directory (e.g. in CI)
    }
}

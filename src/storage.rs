//! Key-value storage backends for the settings and session scopes.
//!
//! Backends mirror the shape of a browser `Storage` object: string keys, string
//! values, enumerable keys. The store treats every error as recoverable.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PROBE_KEY: &str = "__philosobabel_probe__";
const ENTRY_EXTENSION: &str = "entry";
const HASHED_ENTRY_EXTENSION: &str = "hentry";
// Leaves room for the extension within the usual 255-byte file name limit.
const MAX_ENCODED_NAME: usize = 200;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded while writing {key:?}")]
    QuotaExceeded { key: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt storage entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// All keys in the scope, oldest write first. Overwriting a key makes it the newest.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Checks that the backend can be written at all.
    fn probe(&self) -> Result<(), StorageError> {
        self.set_item(PROBE_KEY, "1")?;
        self.remove_item(PROBE_KEY)
    }
}

impl<T: KeyValueStorage + ?Sized> KeyValueStorage for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys()
    }

    fn probe(&self) -> Result<(), StorageError> {
        (**self).probe()
    }
}

/// In-process storage with an optional quota counted in characters of key plus value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<Vec<(String, String)>>,
    quota_chars: Option<usize>,
    disabled: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_chars: usize) -> Self {
        Self {
            quota_chars: Some(quota_chars),
            ..Self::default()
        }
    }

    /// A backend that refuses every operation, like a browser with storage turned off.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled {
            return Err(StorageError::Unavailable("memory storage is disabled".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let mut entries = self.entries.write();
        if let Some(quota) = self.quota_chars {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing != key)
                .map(|(k, v)| k.chars().count() + v.chars().count())
                .sum();
            if others + key.chars().count() + value.chars().count() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        // An overwrite moves the key to the end.
        entries.retain(|(existing, _)| existing != key);
        entries.push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.entries.write().retain(|(existing, _)| existing != key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.entries.read().iter().map(|(key, _)| key.clone()).collect())
    }

    fn probe(&self) -> Result<(), StorageError> {
        self.check_enabled()
    }
}

/// Directory-backed storage: one file per key, written atomically.
///
/// Keys are percent-encoded into the file name. Keys whose encoding would overflow a
/// file name are stored under a blake3 digest instead, with the key kept in the file.
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
    quota_bytes: Option<u64>,
    write_lock: Mutex<()>,
}

#[derive(Serialize)]
struct HashedEntryRef<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct HashedEntry {
    key: String,
    value: String,
}

enum EntryPath {
    Encoded(PathBuf),
    Hashed(PathBuf),
}

impl EntryPath {
    fn path(&self) -> &Path {
        match self {
            Self::Encoded(path) | Self::Hashed(path) => path,
        }
    }
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_quota(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::new(root)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> EntryPath {
        let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        if encoded.len() <= MAX_ENCODED_NAME {
            return EntryPath::Encoded(self.root.join(format!("{encoded}.{ENTRY_EXTENSION}")));
        }
        let digest = blake3::hash(key.as_bytes()).to_hex();
        EntryPath::Hashed(self.root.join(format!("{digest}.{HASHED_ENTRY_EXTENSION}")))
    }

    fn entry_files(&self) -> Result<Vec<(PathBuf, String)>, StorageError> {
        let reader = match fs::read_dir(&self.root) {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        for entry in reader {
            let path = entry?.path();
            let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            let key = match ext {
                ENTRY_EXTENSION => {
                    let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                        continue;
                    };
                    let Ok(key) = percent_decode_str(stem).decode_utf8() else {
                        continue;
                    };
                    key.into_owned()
                }
                HASHED_ENTRY_EXTENSION => match read_hashed(&path) {
                    Ok(Some(entry)) => entry.key,
                    Ok(None) | Err(_) => continue,
                },
                _ => continue,
            };
            files.push((path, key));
        }
        Ok(files)
    }
}

fn read_hashed(path: &Path) -> Result<Option<HashedEntry>, StorageError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl KeyValueStorage for DirStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry_path(key) {
            EntryPath::Encoded(path) => match fs::read_to_string(path) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
            EntryPath::Hashed(path) => Ok(read_hashed(&path)?
                .filter(|entry| entry.key == key)
                .map(|entry| entry.value)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.root)?;
        let entry = self.entry_path(key);
        let contents = match &entry {
            EntryPath::Encoded(_) => value.to_string(),
            EntryPath::Hashed(_) => serde_json::to_string(&HashedEntryRef { key, value })?,
        };
        let path = entry.path();

        if let Some(quota) = self.quota_bytes {
            let mut used = 0u64;
            for (existing, _) in self.entry_files()? {
                if existing != path {
                    used += fs::metadata(&existing).map(|meta| meta.len()).unwrap_or(0);
                }
            }
            if used + contents.len() as u64 > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }

        let temp = path.with_extension("tmp");
        fs::write(&temp, contents)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.entry_path(key).path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut files: Vec<(SystemTime, String)> = self
            .entry_files()?
            .into_iter()
            .map(|(path, key)| {
                let modified = fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, key)
            })
            .collect();
        files.sort();
        Ok(files.into_iter().map(|(_, key)| key).collect())
    }

    fn probe(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        self.set_item(PROBE_KEY, "1")?;
        self.remove_item(PROBE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_keeps_write_order() {
        let storage = MemoryStorage::new();
        storage.set_item("b", "2").unwrap();
        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.keys().unwrap(), ["b", "a"]);
        storage.set_item("b", "3").unwrap();
        assert_eq!(storage.keys().unwrap(), ["a", "b"]);
        assert_eq!(storage.get_item("b").unwrap().as_deref(), Some("3"));
        storage.remove_item("b").unwrap();
        storage.remove_item("missing").unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn memory_quota_rejects_oversized_writes() {
        let storage = MemoryStorage::with_quota(10);
        storage.set_item("k1", "abcd").unwrap();
        let err = storage.set_item("k2", "abcdef").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        // Overwriting an existing key only counts the new value.
        storage.set_item("k1", "abcdefgh").unwrap();
    }

    #[test]
    fn disabled_memory_storage_fails_probe() {
        let storage = MemoryStorage::disabled();
        assert!(matches!(storage.probe(), Err(StorageError::Unavailable(_))));
        assert!(storage.get_item("x").is_err());
    }

    #[test]
    fn dir_storage_round_trips_awkward_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::new(dir.path().join("scope"));
        assert!(storage.keys().unwrap().is_empty());
        storage.probe().unwrap();

        let key = "philosobabel-integration-merriam-webster-pascals wager/é";
        storage.set_item(key, "{\"success\":true}").unwrap();
        assert_eq!(storage.keys().unwrap(), [key]);
        assert_eq!(
            storage.get_item(key).unwrap().as_deref(),
            Some("{\"success\":true}")
        );
        storage.remove_item(key).unwrap();
        assert_eq!(storage.get_item(key).unwrap(), None);
    }

    #[test]
    fn dir_storage_handles_keys_longer_than_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::new(dir.path());
        let ascii = format!("philosobabel-integration-dictionary-{}", "x".repeat(240));
        let accented = "é".repeat(90);

        storage.set_item(&ascii, "long").unwrap();
        storage.set_item(&accented, "accents").unwrap();
        storage.set_item("short", "plain").unwrap();
        assert_eq!(storage.get_item(&ascii).unwrap().as_deref(), Some("long"));
        assert_eq!(storage.get_item(&accented).unwrap().as_deref(), Some("accents"));

        let mut keys = storage.keys().unwrap();
        keys.sort();
        let mut expected = vec![ascii.clone(), accented.clone(), "short".to_string()];
        expected.sort();
        assert_eq!(keys, expected);

        storage.set_item(&ascii, "longer").unwrap();
        assert_eq!(storage.get_item(&ascii).unwrap().as_deref(), Some("longer"));
        storage.remove_item(&ascii).unwrap();
        assert_eq!(storage.get_item(&ascii).unwrap(), None);
        assert_eq!(storage.keys().unwrap().len(), 2);
    }

    #[test]
    fn dir_storage_enforces_quota() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::with_quota(dir.path(), 8);
        storage.set_item("a", "12345").unwrap();
        assert!(matches!(
            storage.set_item("b", "12345"),
            Err(StorageError::QuotaExceeded { .. })
        ));
        storage.set_item("a", "1234567").unwrap();
    }
}

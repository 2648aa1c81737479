//! Keyed persistence areas.

use crate::error::PersistenceError;
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A synchronous string-to-string key/value area (local storage analogue).
pub trait PersistenceArea: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Replace the value stored under `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// In-process area with an optional total size quota.
#[derive(Default)]
pub struct MemoryArea {
    entries: Mutex<HashMap<String, String>>,
    /// Max total bytes of keys plus values (None = unlimited).
    quota: Option<usize>,
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Area that rejects writes pushing the total size past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    /// Total bytes of keys and values currently stored.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl PersistenceArea for MemoryArea {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock();

        if let Some(limit) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let size = others + key.len() + value.len();
            if size > limit {
                return Err(PersistenceError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Directory-backed area: one file per key.
///
/// Files are named by the SHA-256 of the key so any key is a safe file
/// name. The directory is locked exclusively for the lifetime of the area.
pub struct FileArea {
    path: PathBuf,
    _lock_file: File,
}

impl FileArea {
    /// Open (creating if needed) an area rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let lock_file = Self::acquire_lock(&path)?;

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File holding the value of `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.path.join(format!("{}.json", hex::encode(digest)))
    }

    fn acquire_lock(path: &Path) -> Result<File, PersistenceError> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| PersistenceError::Locked)?;

        Ok(lock_file)
    }
}

impl PersistenceArea for FileArea {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.entry_path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let target = self.entry_path(key);
        let tmp = target.with_extension("json.tmp");

        let mut file = File::create(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &target)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_area_roundtrip() {
        let area = MemoryArea::new();
        assert_eq!(area.read("k").unwrap(), None);

        area.write("k", "v1").unwrap();
        area.write("k", "v2").unwrap();
        assert_eq!(area.read("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(area.keys(), vec!["k".to_string()]);

        area.remove("k").unwrap();
        area.remove("k").unwrap();
        assert_eq!(area.read("k").unwrap(), None);
    }

    #[test]
    fn test_memory_area_quota() {
        let area = MemoryArea::with_quota(10);
        area.write("a", "12345").unwrap();
        // Replacing a value only counts the new size.
        area.write("a", "123456789").unwrap();

        let err = area.write("b", "123").unwrap_err();
        assert!(matches!(err, PersistenceError::QuotaExceeded { limit: 10, .. }));
        assert_eq!(area.read("b").unwrap(), None);
        assert_eq!(area.used_bytes(), 10);
    }

    #[test]
    fn test_file_area_roundtrip() {
        let dir = TempDir::new().unwrap();
        let area = FileArea::open(dir.path().join("area")).unwrap();

        area.write("store_clients", "[]").unwrap();
        assert_eq!(area.read("store_clients").unwrap().as_deref(), Some("[]"));
        assert!(area.entry_path("store_clients").exists());

        area.remove("store_clients").unwrap();
        assert_eq!(area.read("store_clients").unwrap(), None);
    }

    #[test]
    fn test_file_area_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let _first = FileArea::open(dir.path()).unwrap();

        let second = FileArea::open(dir.path());
        assert!(matches!(second, Err(PersistenceError::Locked)));
    }
}

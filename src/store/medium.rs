//! Durable key-value backends the store persists into.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use super::MediumError;

/// A persistent key-value medium shared by every execution context.
///
/// Implementations must be safe to share across threads; there is no
/// compare-and-swap, the last write to a key wins.
pub trait Medium: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError>;
    fn write(&self, key: &str, value: &str) -> Result<(), MediumError>;
    fn remove(&self, key: &str) -> Result<(), MediumError>;
}

/// In-memory medium with an optional byte quota across all keys.
#[derive(Default)]
pub struct MemoryMedium {
    entries: Mutex<HashMap<String, String>>,
    quota: Mutex<Option<usize>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        let medium = Self::default();
        medium.set_quota(Some(bytes));
        medium
    }

    pub fn set_quota(&self, bytes: Option<usize>) {
        *self.quota.lock() = bytes;
    }

    /// Bytes currently held across all keys.
    pub fn used_bytes(&self) -> usize {
        self.entries.lock().values().map(String::len).sum()
    }
}

impl Medium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
        let mut entries = self.entries.lock();
        if let Some(limit) = *self.quota.lock() {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > limit {
                return Err(MediumError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory, replaced atomically on write.
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, MediumError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Medium for FileMedium {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
        let full = |e: io::Error| {
            if e.kind() == io::ErrorKind::StorageFull {
                MediumError::QuotaExceeded {
                    key: key.to_string(),
                    needed: value.len(),
                }
            } else {
                MediumError::Io(e)
            }
        };

        let mut file = NamedTempFile::new_in(&self.dir).map_err(full)?;
        file.write_all(value.as_bytes()).map_err(full)?;
        file.persist(self.path(key)).map_err(|e| full(e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip() {
        let medium = MemoryMedium::new();
        assert_eq!(medium.read("k").unwrap(), None);

        medium.write("k", "v1").unwrap();
        medium.write("k", "v2").unwrap();
        assert_eq!(medium.read("k").unwrap().as_deref(), Some("v2"));

        medium.remove("k").unwrap();
        assert_eq!(medium.read("k").unwrap(), None);
    }

    #[test]
    fn memory_quota_counts_other_keys_but_not_the_replaced_value() {
        let medium = MemoryMedium::with_quota(10);
        medium.write("a", "12345").unwrap();
        medium.write("b", "12345").unwrap();
        // replacing "b" frees its old bytes first
        medium.write("b", "54321").unwrap();

        let err = medium.write("c", "x").unwrap_err();
        assert!(matches!(err, MediumError::QuotaExceeded { needed: 11, .. }));
        assert_eq!(medium.used_bytes(), 10);

        medium.set_quota(None);
        medium.write("c", "x").unwrap();
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::open(dir.path().join("nested")).unwrap();
        assert_eq!(medium.read("data").unwrap(), None);

        medium.write("data", "{\"a\":1}").unwrap();
        assert!(medium.path("data").exists());
        assert_eq!(medium.read("data").unwrap().as_deref(), Some("{\"a\":1}"));

        medium.remove("data").unwrap();
        medium.remove("data").unwrap();
        assert_eq!(medium.read("data").unwrap(), None);
    }

    #[test]
    fn file_media_on_one_directory_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileMedium::open(dir.path()).unwrap();
        let b = FileMedium::open(dir.path()).unwrap();

        a.write("data", "from a").unwrap();
        assert_eq!(b.read("data").unwrap().as_deref(), Some("from a"));
    }
}

// src/storage.rs
//! Durable client-side records: one JSON file per key under the state
//! directory. Records are independent — each survives a reload and is
//! cleared individually (sign-out removes the token and job records but
//! leaves preferences intact).

use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AppError;

/// Persisted sign-in token object.
pub const KEY_USER: &str = "user";
/// The single tracked job record.
pub const KEY_CURRENT_JOB: &str = "current_job";
/// Generation preferences (creativity / segmentation levels).
pub const KEY_SETTINGS: &str = "settings";
/// Last-visited view, restored on the next start.
pub const KEY_LAST_PATH: &str = "last_path";

#[derive(Debug, Clone)]
pub struct ClientStorage {
    dir: PathBuf,
}

impl ClientStorage {
    /// Opens the store, creating the directory if needed. `dir` overrides
    /// the default per-user data location.
    pub fn open(dir: Option<PathBuf>) -> Result<Self, AppError> {
        let dir = match dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chapgen"),
        };
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Reads a record. A missing record reads as `None`; a corrupt record is
    /// logged, removed, and also reads as `None` so a bad write can never
    /// wedge startup.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding corrupt record '{}': {}", key, e);
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Writes a record via a temp file + rename so readers never observe a
    /// half-written record.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string_pretty(value)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        let path = self.path_for(key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove record '{}': {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    fn open_temp() -> (tempfile::TempDir, ClientStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::open(Some(dir.path().to_path_buf())).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_roundtrip() {
        let (_dir, storage) = open_temp();
        let record = Record {
            name: "abc".into(),
            count: 3,
        };
        storage.write("sample", &record).unwrap();
        assert_eq!(storage.read::<Record>("sample"), Some(record));
    }

    #[test]
    fn test_missing_reads_as_none() {
        let (_dir, storage) = open_temp();
        assert_eq!(storage.read::<Record>("nope"), None);
    }

    #[test]
    fn test_corrupt_record_is_dropped() {
        let (dir, storage) = open_temp();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert_eq!(storage.read::<Record>("bad"), None);
        // the corrupt file is gone, a later read stays clean
        assert!(!dir.path().join("bad.json").exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, storage) = open_temp();
        storage
            .write(
                "gone",
                &Record {
                    name: "x".into(),
                    count: 1,
                },
            )
            .unwrap();
        storage.remove("gone");
        storage.remove("gone");
        assert_eq!(storage.read::<Record>("gone"), None);
    }
}

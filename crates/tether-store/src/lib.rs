//! tether-store — session record persistence.
//!
//! The runtime emits one [`SessionRecord`] per in-flight debug session
//! and removes it on teardown. Records are write-only from the runtime's
//! perspective; external tooling reads them to find orphaned sessions.

pub mod error;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

pub use error::StoreError;

/// Snapshot of one in-flight debug session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// Identifier of the adapter driving the session.
    pub adapter_identifier: String,
    /// The launch/attach configuration the session was started with.
    pub configuration: Value,
    /// When the session reached its running state.
    pub timestamp: DateTime<Utc>,
}

impl SessionRecord {
    /// A record stamped with the current time.
    pub fn new(session_id: Uuid, adapter_identifier: String, configuration: Value) -> Self {
        Self {
            session_id,
            adapter_identifier,
            configuration,
            timestamp: Utc::now(),
        }
    }
}

/// Directory-backed store of session records, one JSON file per session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Persist a record, atomically (write a temp file, then rename).
    pub fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::PersistenceFailure(format!("serialize record: {e}")))?;
        let path = self.record_path(record.session_id);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Remove a record. Removing an absent record is not an error.
    pub fn remove(&self, session_id: Uuid) -> Result<(), StoreError> {
        let path = self.record_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Whether a record exists for `session_id`.
    pub fn contains(&self, session_id: Uuid) -> bool {
        self.record_path(session_id).exists()
    }

    /// Load every readable record, skipping corrupt files with a warning.
    pub fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match serde_json::from_slice::<SessionRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping corrupt session record");
                }
            }
        }
        records.sort_by_key(|record| record.timestamp);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_record() -> SessionRecord {
        SessionRecord::new(
            Uuid::new_v4(),
            "lldb".into(),
            json!({"program": "/tmp/app"}),
        )
    }

    #[test]
    fn store_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("sessions");
        let store = SessionStore::new(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let record = sample_record();

        store.save(&record).unwrap();
        assert!(store.contains(record.session_id));

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[test]
    fn save_overwrites_existing_record() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let mut record = sample_record();
        store.save(&record).unwrap();

        record.configuration = json!({"program": "/tmp/other"});
        store.save(&record).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].configuration["program"], "/tmp/other");
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let record = sample_record();

        store.save(&record).unwrap();
        store.remove(record.session_id).unwrap();
        assert!(!store.contains(record.session_id));
        // A second removal is a no-op.
        store.remove(record.session_id).unwrap();
    }

    #[test]
    fn load_all_skips_corrupt_records() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let record = sample_record();
        store.save(&record).unwrap();
        std::fs::write(tmp.path().join("corrupt.json"), b"NOT JSON").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].session_id, record.session_id);
    }

    #[test]
    fn load_all_sorted_by_timestamp() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();

        let mut older = sample_record();
        older.timestamp = Utc::now() - chrono::Duration::minutes(5);
        let newer = sample_record();

        store.save(&newer).unwrap();
        store.save(&older).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].session_id, older.session_id);
        assert_eq!(loaded[1].session_id, newer.session_id);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        store.save(&sample_record()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}

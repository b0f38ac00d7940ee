//! File-backed tracking store.

use crate::error::SyncResult;
use crate::tracker::{now_millis, TrackingFilter, TrackingRecord, TrackingStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// A tracking store persisted as one JSON file.
///
/// Every mutation rewrites the whole table to a sibling temporary file and
/// renames it over the original, so a crash leaves either the old or the new
/// table on disk.
///
/// # Example
///
/// ```no_run
/// use syndic_engine::{FileTrackingStore, PublisherTracker};
/// use std::sync::Arc;
///
/// let store = FileTrackingStore::open("tracking/publisher.json").unwrap();
/// let tracker = PublisherTracker::new(Arc::new(store));
/// ```
#[derive(Debug)]
pub struct FileTrackingStore {
    path: PathBuf,
    records: RwLock<BTreeMap<Uuid, TrackingRecord>>,
}

impl FileTrackingStore {
    /// Opens the store at `path`, loading existing records.
    ///
    /// Parent directories are created if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let records = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                let rows: Vec<TrackingRecord> = serde_json::from_slice(&bytes)?;
                rows.into_iter().map(|r| (r.entity_uuid, r)).collect()
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), records = records.len(), "Tracking store opened");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Returns the path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn persist(&self, records: &BTreeMap<Uuid, TrackingRecord>) -> SyncResult<()> {
        let rows: Vec<&TrackingRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&rows)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TrackingStore for FileTrackingStore {
    fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>> {
        Ok(self.records.read().get(uuid).cloned())
    }

    fn upsert(&self, record: TrackingRecord) -> SyncResult<()> {
        let mut records = self.records.write();
        let previous = records.insert(record.entity_uuid, record.clone());
        if let Err(e) = self.persist(&records) {
            match previous {
                Some(previous) => records.insert(record.entity_uuid, previous),
                None => records.remove(&record.entity_uuid),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, uuid: &Uuid) -> SyncResult<bool> {
        let mut records = self.records.write();
        let Some(removed) = records.remove(uuid) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&records) {
            records.insert(*uuid, removed);
            return Err(e);
        }
        Ok(true)
    }

    fn list(&self, filter: &TrackingFilter) -> SyncResult<Vec<TrackingRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn nullify_hashes(&self, filter: &TrackingFilter) -> SyncResult<usize> {
        let mut records = self.records.write();
        let snapshot = records.clone();
        let now = now_millis();
        let mut count = 0;
        for record in records.values_mut() {
            if filter.matches(record) && record.hash.take().is_some() {
                record.modified = now;
                count += 1;
            }
        }
        if count > 0 {
            if let Err(e) = self.persist(&records) {
                *records = snapshot;
                return Err(e);
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::PublisherTracker;
    use std::sync::Arc;
    use syndic_cdf::TrackingStatus;
    use tempfile::tempdir;

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracking").join("publisher.json");
        let uuid = Uuid::from_u128(1);

        {
            let tracker = PublisherTracker::new(Arc::new(FileTrackingStore::open(&path).unwrap()));
            tracker.track_queued("node", Some(1), uuid).unwrap();
            tracker.track_exported("node", Some(1), uuid, "abc").unwrap();
        }

        let store = FileTrackingStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        let record = store.get(&uuid).unwrap().unwrap();
        assert_eq!(record.status, TrackingStatus::Exported);
        assert_eq!(record.hash.as_deref(), Some("abc"));
    }

    #[test]
    fn delete_and_nullify_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subscriber.json");
        let store = FileTrackingStore::open(&path).unwrap();

        let mut a = TrackingRecord::new("node", Uuid::from_u128(1), TrackingStatus::Imported);
        a.hash = Some("h1".into());
        let mut b = TrackingRecord::new("node", Uuid::from_u128(2), TrackingStatus::Imported);
        b.hash = Some("h2".into());
        store.upsert(a).unwrap();
        store.upsert(b).unwrap();

        assert!(store.delete(&Uuid::from_u128(2)).unwrap());
        assert!(!store.delete(&Uuid::from_u128(2)).unwrap());
        assert_eq!(store.nullify_hashes(&TrackingFilter::all()).unwrap(), 1);

        let reopened = FileTrackingStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&Uuid::from_u128(1)).unwrap().unwrap().hash, None);
        assert!(!dir.path().join("subscriber.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(FileTrackingStore::open(&path).is_err());
    }
}

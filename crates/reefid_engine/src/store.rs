use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reefid_logging::{reef_debug, reef_info, reef_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filename::{record_filename, RECORD_EXTENSION};
use crate::persist::{ensure_data_dir, AtomicFileWriter, PersistError};
use crate::{AssetReference, Clock};

/// A captured photo awaiting (or having failed) identification.
///
/// `is_processed == true` implies `failure_reason == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingImageRecord {
    pub asset_reference: AssetReference,
    pub captured_at: DateTime<Utc>,
    pub is_processed: bool,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "cached_bytes_base64",
        skip_serializing_if = "Option::is_none"
    )]
    pub cached_bytes: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no pending record for {0}")]
    NotFound(AssetReference),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store worker failed: {0}")]
    Worker(String),
}

/// Durable collection of pending records, one JSON document per record.
///
/// Writes to the same asset reference are serialized through a per-key lock so
/// read-modify-write cycles never interleave; distinct keys proceed in parallel.
pub struct PendingItemStore {
    writer: AtomicFileWriter,
    clock: Clock,
    records: RwLock<HashMap<AssetReference, PendingImageRecord>>,
    key_locks: DashMap<AssetReference, Arc<Mutex<()>>>,
}

impl PendingItemStore {
    /// Opens (or creates) a store rooted at `dir`, loading every readable record.
    pub fn open(dir: impl Into<PathBuf>, clock: Clock) -> Result<Self, StoreError> {
        let dir = dir.into();
        ensure_data_dir(&dir)?;
        let records = load_records(&dir)?;
        reef_info!("Opened pending store at {:?} with {} records", dir, records.len());
        Ok(Self {
            writer: AtomicFileWriter::new(dir),
            clock,
            records: RwLock::new(records),
            key_locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn get(&self, asset: &AssetReference) -> Option<PendingImageRecord> {
        self.read_records().get(asset).cloned()
    }

    /// Returns the existing record for `asset` unchanged, or creates a fresh one.
    pub fn upsert(
        &self,
        asset: &AssetReference,
        captured_at: DateTime<Utc>,
        failure_reason: Option<String>,
    ) -> Result<PendingImageRecord, StoreError> {
        self.with_key_lock(asset, || {
            if let Some(existing) = self.get(asset) {
                return Ok(existing);
            }
            let record = PendingImageRecord {
                asset_reference: asset.clone(),
                captured_at,
                is_processed: false,
                failure_reason,
                retry_count: 0,
                last_attempt_at: None,
                cached_bytes: None,
            };
            self.commit(record)
        })
    }

    /// Counts a failed retry attempt against `asset`.
    pub fn record_failure(
        &self,
        asset: &AssetReference,
        reason: impl Into<String>,
    ) -> Result<PendingImageRecord, StoreError> {
        let reason = reason.into();
        let now = (self.clock)();
        self.update(asset, move |record| {
            record.retry_count = record.retry_count.saturating_add(1);
            record.last_attempt_at = Some(now);
            record.failure_reason = Some(reason);
            record.is_processed = false;
        })
    }

    pub fn mark_processed(&self, asset: &AssetReference) -> Result<PendingImageRecord, StoreError> {
        self.update(asset, |record| {
            record.is_processed = true;
            record.failure_reason = None;
        })
    }

    /// Keeps the resized payload with the record so retries skip the library fetch.
    pub fn attach_cached_bytes(
        &self,
        asset: &AssetReference,
        bytes: Vec<u8>,
    ) -> Result<PendingImageRecord, StoreError> {
        self.update(asset, move |record| record.cached_bytes = Some(bytes))
    }

    /// All records, newest capture first. Each call reflects the current contents.
    pub fn list(&self) -> PendingRecords<'_> {
        PendingRecords::new(self, false)
    }

    /// Like [`list`](Self::list) but skips processed records.
    pub fn list_unprocessed(&self) -> PendingRecords<'_> {
        PendingRecords::new(self, true)
    }

    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.read_records()
            .values()
            .filter(|record| !record.is_processed)
            .count()
    }

    /// Deletes the given records. Unknown keys are ignored. Returns how many were removed.
    pub fn delete<'a>(
        &self,
        assets: impl IntoIterator<Item = &'a AssetReference>,
    ) -> Result<usize, StoreError> {
        let mut removed = 0;
        for asset in assets {
            let existed = self.with_key_lock(asset, || -> Result<bool, StoreError> {
                let on_disk = self.writer.remove(&record_filename(asset))?;
                let in_memory = self.write_records().remove(asset).is_some();
                Ok(on_disk || in_memory)
            })?;
            // Drop the key's lock unless another writer is already waiting on it.
            self.key_locks
                .remove_if(asset, |_, lock| Arc::strong_count(lock) == 1);
            if existed {
                removed += 1;
            }
        }
        if removed > 0 {
            reef_info!("Deleted {} pending records", removed);
        }
        Ok(removed)
    }

    /// Removes every record that has already been identified.
    pub fn delete_processed(&self) -> Result<usize, StoreError> {
        let processed: Vec<AssetReference> = self
            .read_records()
            .values()
            .filter(|record| record.is_processed)
            .map(|record| record.asset_reference.clone())
            .collect();
        self.delete(&processed)
    }

    fn update(
        &self,
        asset: &AssetReference,
        apply: impl FnOnce(&mut PendingImageRecord),
    ) -> Result<PendingImageRecord, StoreError> {
        self.with_key_lock(asset, || {
            let mut record = self
                .get(asset)
                .ok_or_else(|| StoreError::NotFound(asset.clone()))?;
            apply(&mut record);
            self.commit(record)
        })
    }

    /// Persists `record`, then publishes it to readers. Callers hold the key lock.
    fn commit(&self, record: PendingImageRecord) -> Result<PendingImageRecord, StoreError> {
        let encoded = serde_json::to_vec_pretty(&record)?;
        self.writer
            .write(&record_filename(&record.asset_reference), &encoded)?;
        reef_debug!(
            "Persisted pending record {} (retries={}, processed={})",
            record.asset_reference,
            record.retry_count,
            record.is_processed
        );
        self.write_records()
            .insert(record.asset_reference.clone(), record.clone());
        Ok(record)
    }

    fn with_key_lock<T>(&self, asset: &AssetReference, f: impl FnOnce() -> T) -> T {
        // Clone the Arc out so the map shard is not held while waiting on the key.
        let lock = self.key_locks.entry(asset.clone()).or_default().clone();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<AssetReference, PendingImageRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<AssetReference, PendingImageRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazy listing over a store. Ordering is fixed when the listing starts; record
/// contents are read as the iterator advances, and deleted records are skipped.
pub struct PendingRecords<'a> {
    store: &'a PendingItemStore,
    keys: std::vec::IntoIter<AssetReference>,
    only_unprocessed: bool,
}

impl<'a> PendingRecords<'a> {
    fn new(store: &'a PendingItemStore, only_unprocessed: bool) -> Self {
        let mut order: Vec<(DateTime<Utc>, AssetReference)> = store
            .read_records()
            .values()
            .map(|record| (record.captured_at, record.asset_reference.clone()))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Self {
            store,
            keys: order
                .into_iter()
                .map(|(_, asset)| asset)
                .collect::<Vec<_>>()
                .into_iter(),
            only_unprocessed,
        }
    }
}

impl Iterator for PendingRecords<'_> {
    type Item = PendingImageRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for asset in self.keys.by_ref() {
            match self.store.get(&asset) {
                Some(record) if self.only_unprocessed && record.is_processed => continue,
                Some(record) => return Some(record),
                None => continue,
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}

fn load_records(dir: &Path) -> Result<HashMap<AssetReference, PendingImageRecord>, StoreError> {
    let mut records = HashMap::new();
    let entries = fs::read_dir(dir).map_err(PersistError::Io)?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(RECORD_EXTENSION) {
            continue;
        }
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) => {
                reef_warn!("Skipping unreadable pending record {:?}: {}", path, err);
                continue;
            }
        };
        match serde_json::from_slice::<PendingImageRecord>(&content) {
            Ok(record) => {
                records.insert(record.asset_reference.clone(), record);
            }
            Err(err) => {
                reef_warn!("Skipping corrupt pending record {:?}: {}", path, err);
            }
        }
    }
    Ok(records)
}

mod cached_bytes_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

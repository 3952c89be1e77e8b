//! Slot backend trait and the in-memory backend
//!
//! The trait is deliberately narrow: `create` is create-if-absent and is
//! the sole atomic primitive. There is no compare-and-swap and no
//! transactional update; everything above this trait is built on "create a
//! record with this key; fail if it already exists".

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, StoreError};
use crate::record::SlotRecord;

/// Backing store for slot records
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait SlotBackend: Send + Sync {
    /// Create a record; fail with `AlreadyExists` if the key is taken
    ///
    /// This is the concurrency-safety mechanism: per distinct key, exactly
    /// one of any number of racing creates succeeds.
    async fn create(&self, record: &SlotRecord) -> Result<()>;

    /// List all records in the control namespace
    async fn list(&self) -> Result<Vec<SlotRecord>>;

    /// Delete a record by backing name
    async fn delete(&self, name: &str) -> Result<()>;

    /// Merge-patch string fields of an existing record
    async fn patch(&self, name: &str, fields: &BTreeMap<String, String>) -> Result<()>;
}

/// Counts of operations performed, for test assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub creates: usize,
    pub lists: usize,
    pub deletes: usize,
    pub patches: usize,
}

/// In-memory backend for tests and dry runs
#[derive(Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<BTreeMap<String, SlotRecord>>>,
    operations: Arc<Mutex<OperationCounts>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated records
    pub fn with_records(records: Vec<SlotRecord>) -> Self {
        let backend = Self::new();
        {
            let mut store = backend.records.lock().unwrap();
            for record in records {
                store.insert(record.name.clone(), record);
            }
        }
        backend
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.lock().unwrap().clone()
    }

    /// Number of stored records
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl SlotBackend for MemoryBackend {
    async fn create(&self, record: &SlotRecord) -> Result<()> {
        self.operations.lock().unwrap().creates += 1;

        let mut store = self.records.lock().unwrap();
        if store.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists {
                name: record.name.clone(),
            });
        }
        store.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SlotRecord>> {
        self.operations.lock().unwrap().lists += 1;
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.operations.lock().unwrap().deletes += 1;

        self.records
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::RecordNotFound {
                name: name.to_string(),
            })
    }

    async fn patch(&self, name: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.operations.lock().unwrap().patches += 1;

        let mut store = self.records.lock().unwrap();
        let record = store.get_mut(name).ok_or_else(|| StoreError::RecordNotFound {
            name: name.to_string(),
        })?;

        let mut data = record.to_data();
        for (k, v) in fields {
            data.insert(k.clone(), v.clone());
        }
        *record = SlotRecord::from_data(name, &data);
        Ok(())
    }
}

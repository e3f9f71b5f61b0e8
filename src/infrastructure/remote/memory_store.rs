use crate::application::ports::{RemoteError, RemoteRecordStore};
use crate::domain::value_objects::{FieldMap, RecordId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Reference remote authority kept in process memory.
///
/// Writes merge the given fields into the stored record, which makes a
/// repeated full-field write a no-op. Availability, per-record rejection and
/// write latency can be controlled to simulate a flaky network.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordId, FieldMap>>,
    writes: RwLock<Vec<(RecordId, FieldMap)>>,
    rejected: RwLock<HashSet<RecordId>>,
    unavailable: AtomicBool,
    write_delay: RwLock<Option<Duration>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, record_id: RecordId, fields: FieldMap) {
        self.records.write().await.insert(record_id, fields);
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Every later write for `record_id` is refused as invalid.
    pub async fn reject(&self, record_id: RecordId) {
        self.rejected.write().await.insert(record_id);
    }

    pub async fn accept(&self, record_id: &RecordId) {
        self.rejected.write().await.remove(record_id);
    }

    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.write().await = delay;
    }

    pub async fn record(&self, record_id: &RecordId) -> Option<FieldMap> {
        self.records.read().await.get(record_id).cloned()
    }

    /// Applied writes in arrival order.
    pub async fn writes(&self) -> Vec<(RecordId, FieldMap)> {
        self.writes.read().await.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.writes.read().await.len()
    }
}

#[async_trait]
impl RemoteRecordStore for InMemoryRecordStore {
    async fn write_fields(
        &self,
        record_id: &RecordId,
        fields: &FieldMap,
    ) -> Result<(), RemoteError> {
        let delay = *self.write_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.is_available() {
            return Err(RemoteError::Failed("remote authority unreachable".into()));
        }
        if self.rejected.read().await.contains(record_id) {
            return Err(RemoteError::Rejected(format!(
                "record {record_id} failed validation"
            )));
        }

        let mut records = self.records.write().await;
        let stored = records.entry(record_id.clone()).or_default();
        for (name, value) in fields {
            stored.insert(name.clone(), value.clone());
        }
        drop(records);

        self.writes
            .write()
            .await
            .push((record_id.clone(), fields.clone()));
        Ok(())
    }

    async fn read_fields(
        &self,
        record_id: &RecordId,
        names: &[&str],
    ) -> Result<FieldMap, RemoteError> {
        if !self.is_available() {
            return Err(RemoteError::Failed("remote authority unreachable".into()));
        }

        let records = self.records.read().await;
        let stored = records
            .get(record_id)
            .ok_or_else(|| RemoteError::NotFound(record_id.to_string()))?;

        if names.is_empty() {
            return Ok(stored.clone());
        }
        Ok(names
            .iter()
            .filter_map(|name| {
                stored
                    .get(*name)
                    .map(|value| ((*name).to_string(), value.clone()))
            })
            .collect())
    }
}

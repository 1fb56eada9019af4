use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use aurasign_core::{CorrelationId, JobField, JobFields};

use crate::job_state::{JobStateStore, StoreError};

/// In-memory job state store (tests/dev).
///
/// Entries optionally expire `ttl` after their last write. Expired entries
/// read as absent; `purge_expired` reclaims their memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStateStore {
    entries: Mutex<HashMap<CorrelationId, Entry>>,
    ttl: Option<Duration>,
}

#[derive(Debug)]
struct Entry {
    fields: JobFields,
    touched_at: Instant,
}

impl InMemoryJobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        Ok(before - entries.len())
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| !self.is_expired(e, now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CorrelationId, Entry>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.ttl.is_some_and(|ttl| entry.touched_at + ttl <= now)
    }

    /// Remove `correlation_id` if it has expired, so callers only see live state.
    fn evict_if_expired(
        &self,
        entries: &mut HashMap<CorrelationId, Entry>,
        correlation_id: &CorrelationId,
        now: Instant,
    ) {
        if entries
            .get(correlation_id)
            .is_some_and(|e| self.is_expired(e, now))
        {
            entries.remove(correlation_id);
        }
    }
}

#[async_trait]
impl JobStateStore for InMemoryJobStateStore {
    async fn set_field(
        &self,
        correlation_id: &CorrelationId,
        field: JobField,
        value: &str,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        self.evict_if_expired(&mut entries, correlation_id, now);

        let entry = entries
            .entry(correlation_id.clone())
            .or_insert_with(|| Entry {
                fields: JobFields::new(),
                touched_at: now,
            });
        entry.fields.set(field, value);
        entry.touched_at = now;
        Ok(())
    }

    async fn get_job(&self, correlation_id: &CorrelationId) -> Result<JobFields, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        self.evict_if_expired(&mut entries, correlation_id, now);
        Ok(entries
            .get(correlation_id)
            .map(|e| e.fields.clone())
            .unwrap_or_default())
    }

    async fn clear(&self, correlation_id: &CorrelationId) -> Result<(), StoreError> {
        self.lock()?.remove(correlation_id);
        Ok(())
    }

    async fn take_if_complete(
        &self,
        correlation_id: &CorrelationId,
        required: &[JobField],
    ) -> Result<Option<JobFields>, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        self.evict_if_expired(&mut entries, correlation_id, now);

        let complete = entries
            .get(correlation_id)
            .is_some_and(|e| e.fields.missing(required).is_empty());
        if !complete {
            return Ok(None);
        }
        Ok(entries.remove(correlation_id).map(|e| e.fields))
    }
}

//! Job State Store port.
//!
//! Partial results for one job live under its correlation id. Each stage
//! upserts only the fields it owns; the aggregator reads the entry and clears
//! it once the job has moved on. Operations are single-key and atomic, which
//! is the only cross-instance synchronisation the pipeline relies on.

use std::sync::Arc;

use async_trait::async_trait;

use aurasign_core::{CorrelationId, JobField, JobFields};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job state backend error: {0}")]
    Backend(String),

    #[error("job state lock poisoned")]
    Poisoned,

    /// The backend holds a value that does not map to a known field.
    #[error("corrupt job state entry: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Idempotent upsert; last write wins. Creates the entry on first write.
    async fn set_field(
        &self,
        correlation_id: &CorrelationId,
        field: JobField,
        value: &str,
    ) -> Result<(), StoreError>;

    /// Every field written so far; empty when the entry does not exist.
    async fn get_job(&self, correlation_id: &CorrelationId) -> Result<JobFields, StoreError>;

    async fn clear(&self, correlation_id: &CorrelationId) -> Result<(), StoreError>;

    /// Atomically return and delete the entry if every `required` field is present.
    ///
    /// For one completed entry exactly one caller observes `Some`.
    async fn take_if_complete(
        &self,
        correlation_id: &CorrelationId,
        required: &[JobField],
    ) -> Result<Option<JobFields>, StoreError>;
}

#[async_trait]
impl<S> JobStateStore for Arc<S>
where
    S: JobStateStore + ?Sized,
{
    async fn set_field(
        &self,
        correlation_id: &CorrelationId,
        field: JobField,
        value: &str,
    ) -> Result<(), StoreError> {
        (**self).set_field(correlation_id, field, value).await
    }

    async fn get_job(&self, correlation_id: &CorrelationId) -> Result<JobFields, StoreError> {
        (**self).get_job(correlation_id).await
    }

    async fn clear(&self, correlation_id: &CorrelationId) -> Result<(), StoreError> {
        (**self).clear(correlation_id).await
    }

    async fn take_if_complete(
        &self,
        correlation_id: &CorrelationId,
        required: &[JobField],
    ) -> Result<Option<JobFields>, StoreError> {
        (**self).take_if_complete(correlation_id, required).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    Pending { missing: Vec<JobField> },
    Complete,
}

/// An N-of-N join over job fields.
///
/// The aggregator uses [`JobJoin::recognition`] to decide when language
/// generation may start: both the gloss and the dominant emotion must exist,
/// in whichever order they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobJoin {
    required: Vec<JobField>,
}

impl JobJoin {
    pub fn new(required: impl IntoIterator<Item = JobField>) -> Self {
        let mut required: Vec<JobField> = required.into_iter().collect();
        required.sort();
        required.dedup();
        Self { required }
    }

    pub fn recognition() -> Self {
        Self::new([JobField::RawGloss, JobField::DominantEmotion])
    }

    pub fn required(&self) -> &[JobField] {
        &self.required
    }

    pub fn status(&self, fields: &JobFields) -> JoinStatus {
        let missing = fields.missing(&self.required);
        if missing.is_empty() {
            JoinStatus::Complete
        } else {
            JoinStatus::Pending { missing }
        }
    }

    /// Claim the entry if complete. Concurrent callers race; only one wins.
    pub async fn try_complete<S>(
        &self,
        store: &S,
        correlation_id: &CorrelationId,
    ) -> Result<Option<JobFields>, StoreError>
    where
        S: JobStateStore + ?Sized,
    {
        store.take_if_complete(correlation_id, &self.required).await
    }
}

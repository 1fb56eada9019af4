//! The four pipeline stages.
//!
//! A stage is pure message semantics: it takes a validated payload, calls its
//! capability, and says what to persist and what to publish. Decoding,
//! acknowledgement and broker plumbing belong to the stage worker.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use aurasign_ai::CapabilityError;
use aurasign_core::{FinalResult, JobField, PartReceived, SpeechJob, StageKind, Validate};
use aurasign_events::{BrokerError, StoreError};

pub mod emotion;
pub mod gesture;
pub mod language;
pub mod speech;

pub use emotion::EmotionStage;
pub use gesture::GestureStage;
pub use language::LanguageStage;
pub use speech::SpeechStage;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The message can never succeed; reject without requeue.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The model call failed; reject without requeue.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Connection-level; handled by the supervisor, never by rejecting.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a stage sends on after processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// Tell the aggregator a partial is in the store.
    Notify(PartReceived),
    /// Relay a job to the next stage.
    Forward {
        routing_key: &'static str,
        body: SpeechJob,
    },
    /// Deliver the final artifact to the caller's `reply_to`.
    Reply(FinalResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Persisted, in order, before the publication goes out.
    pub writes: Vec<(JobField, String)>,
    pub publication: Publication,
}

impl StageOutcome {
    pub fn new(publication: Publication) -> Self {
        Self {
            writes: Vec::new(),
            publication,
        }
    }

    pub fn write(mut self, field: JobField, value: impl Into<String>) -> Self {
        self.writes.push((field, value.into()));
        self
    }
}

#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Input: DeserializeOwned + Validate + Send + Sync;

    fn kind(&self) -> StageKind;

    async fn process(&self, input: &Self::Input) -> Result<StageOutcome, StageError>;
}

//! `aurasign-core`: pipeline foundation building blocks.
//!
//! This crate contains the **pure** vocabulary shared by every stage: job
//! identifiers, stage kinds, partial-result fields and the payload records
//! carried on each routing key. No broker or storage concerns live here.

pub mod error;
pub mod id;
pub mod job;
pub mod payload;
pub mod stage;

pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, ReplyTo};
pub use job::{JobField, JobFields, PartReceived};
pub use payload::{
    FinalResult, Frame, LanguageJob, PartNotification, RecognitionJob, SpeechJob, Validate,
    Window,
};
pub use stage::StageKind;

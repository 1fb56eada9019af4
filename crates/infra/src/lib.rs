//! Infrastructure layer: broker and store adapters, capability clients, and
//! the runtime that drives a stage.
//!
//! - `stages`: the four stage definitions (pure message semantics)
//! - `workers`: stage worker runtime and connection supervisor
//! - `ingress`: job origination
//! - `broker`, `job_state`, `capabilities`: production adapters behind the
//!   `amqp`, `redis` and `http` features

pub mod broker;
pub mod capabilities;
pub mod ingress;
pub mod job_state;
pub mod stages;
pub mod workers;

pub use ingress::{IngressError, PipelineIngress};
pub use stages::{
    EmotionStage, GestureStage, LanguageStage, Publication, SpeechStage, Stage, StageError,
    StageOutcome,
};
pub use workers::{
    ConnectionSupervisor, SessionWorker, StageContext, StageWorker, SupervisorConfig,
    SupervisorHandle, SupervisorStats, WorkerStats,
};

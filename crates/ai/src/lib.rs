//! `aurasign-ai`
//!
//! **Responsibility:** the model boundary of each stage.
//!
//! - Capability traits (`SignClassifier`, `EmotionClassifier`, `SentenceGenerator`,
//!   `SpeechSynthesizer`) are black boxes; adapters live in `aurasign-infra`.
//! - Everything deterministic around a model call lives here: gloss decoding,
//!   face normalisation and emotion voting, prompt building and reply parsing.
//!
//! No broker or storage concerns.

pub mod capability;
pub mod emotion;
pub mod gloss;
pub mod prompt;

pub use capability::{
    CapabilityError, EmotionClassifier, Prediction, SentenceGenerator, SignClassifier,
    SpeechSynthesizer,
};
pub use emotion::{dominant_emotion, face_features};
pub use gloss::GlossDecoder;
pub use prompt::{Interpretation, interpretation_prompt, parse_interpretation};

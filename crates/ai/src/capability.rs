use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One classifier verdict for a window of frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Probability of `label` in \[0, 1\].
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("capability returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("capability rejected the input: {0}")]
    Rejected(String),
}

/// Sign-language classifier over one window of keypoint frames.
#[async_trait]
pub trait SignClassifier: Send + Sync {
    async fn predict(&self, window: &[Vec<f32>]) -> Result<Prediction, CapabilityError>;
}

/// Facial-emotion classifier over one normalised face vector.
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, features: &[f32]) -> Result<String, CapabilityError>;
}

/// Text-in, text-out language model.
#[async_trait]
pub trait SentenceGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;
}

/// Text-to-speech. `emotion` is a styling hint the model may ignore.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        emotion: Option<&str>,
    ) -> Result<Vec<u8>, CapabilityError>;
}

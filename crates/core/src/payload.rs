//! Stage payload records (JSON bodies carried on each routing key).
//!
//! Field names are wire-stable: the external aggregator and the caller read
//! these bodies directly.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::job::PartReceived;

/// One keypoint frame: the flattened holistic landmark vector.
pub type Frame = Vec<f32>;

/// A fixed-length run of frames fed to the gesture classifier as one input.
pub type Window = Vec<Frame>;

/// Payload-level checks beyond what deserialization enforces.
///
/// A failure here is permanent: reprocessing the same bytes cannot succeed.
pub trait Validate {
    fn validate(&self) -> DomainResult<()>;
}

/// Ingress job on `recognition_task`, consumed by both gesture and emotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionJob {
    pub landmark_data: Vec<Window>,
}

impl RecognitionJob {
    /// All frames across all windows, in capture order.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.landmark_data.iter().flatten()
    }
}

impl Validate for RecognitionJob {
    fn validate(&self) -> DomainResult<()> {
        for (w, window) in self.landmark_data.iter().enumerate() {
            for (f, frame) in window.iter().enumerate() {
                if frame.iter().any(|v| !v.is_finite()) {
                    return Err(DomainError::validation(format!(
                        "landmark_data[{w}][{f}] contains a non-finite value"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Lightweight notification on `aggregator_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartNotification {
    pub part_received: PartReceived,
}

/// Language-generation job on `gemini_task` (published by the aggregator).
///
/// `raw_gloss` may be empty when no sign cleared the confidence threshold; the
/// generator still gets to interpret the emotion on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageJob {
    pub raw_gloss: String,
    pub dominant_emotion: String,
}

impl Validate for LanguageJob {
    fn validate(&self) -> DomainResult<()> {
        if self.dominant_emotion.trim().is_empty() {
            return Err(DomainError::missing_field("dominant_emotion"));
        }
        Ok(())
    }
}

/// Synthesis job on `tts_task`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechJob {
    pub sentence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

impl SpeechJob {
    pub const DEFAULT_TONE: &'static str = "Casual";

    pub fn tone_or_default(&self) -> &str {
        self.tone
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(Self::DEFAULT_TONE)
    }
}

impl Validate for SpeechJob {
    fn validate(&self) -> DomainResult<()> {
        if self.sentence.trim().is_empty() {
            return Err(DomainError::missing_field("sentence"));
        }
        Ok(())
    }
}

/// Final artifact delivered to the caller's `reply_to` destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    pub sentence: String,
    /// Base64-encoded WAV audio.
    #[serde(rename = "audioData")]
    pub audio_data: String,
    #[serde(rename = "conversationTone")]
    pub conversation_tone: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognition_job_requires_landmark_data() {
        let missing = serde_json::from_value::<RecognitionJob>(json!({}));
        assert!(missing.is_err());

        let job: RecognitionJob =
            serde_json::from_value(json!({ "landmark_data": [[[0.1, 0.2], [0.3, 0.4]]] }))
                .unwrap();
        assert_eq!(job.frames().count(), 2);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn recognition_job_rejects_non_finite_values() {
        let job = RecognitionJob {
            landmark_data: vec![vec![vec![0.0, f32::NAN]]],
        };
        assert!(matches!(job.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn speech_job_defaults_tone_and_requires_sentence() {
        let job: SpeechJob = serde_json::from_value(json!({ "sentence": "Hello there." })).unwrap();
        assert_eq!(job.tone_or_default(), "Casual");
        assert!(job.validate().is_ok());

        let blank: SpeechJob = serde_json::from_value(json!({ "sentence": "  " })).unwrap();
        assert_eq!(
            blank.validate(),
            Err(DomainError::missing_field("sentence"))
        );
    }

    #[test]
    fn language_job_requires_both_partials() {
        let job = LanguageJob {
            raw_gloss: "HELLO".into(),
            dominant_emotion: "".into(),
        };
        assert_eq!(
            job.validate(),
            Err(DomainError::missing_field("dominant_emotion"))
        );
    }

    #[test]
    fn language_job_accepts_an_empty_gloss() {
        let job = LanguageJob {
            raw_gloss: String::new(),
            dominant_emotion: "sad".into(),
        };
        assert_eq!(job.validate(), Ok(()));
    }

    #[test]
    fn final_result_uses_caller_field_names() {
        let result = FinalResult {
            sentence: "Hi.".into(),
            audio_data: "UklGRg==".into(),
            conversation_tone: "Casual".into(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["audioData"], "UklGRg==");
        assert_eq!(value["conversationTone"], "Casual");
    }

    #[test]
    fn notification_wire_shape() {
        let value = serde_json::to_value(PartNotification {
            part_received: PartReceived::Emotion,
        })
        .unwrap();
        assert_eq!(value, json!({ "part_received": "emotion" }));
    }
}

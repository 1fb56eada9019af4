//! The four independently deployable processing steps.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Sign-language gesture recognition (produces `raw_gloss`).
    Gesture,
    /// Facial emotion recognition (produces `dominant_emotion`).
    Emotion,
    /// Natural-language sentence generation (produces `sentence`, `tone`).
    Language,
    /// Speech synthesis, the terminal stage (produces `audio`).
    Speech,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Gesture,
        StageKind::Emotion,
        StageKind::Language,
        StageKind::Speech,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Gesture => "gesture",
            StageKind::Emotion => "emotion",
            StageKind::Language => "language",
            StageKind::Speech => "speech",
        }
    }
}

impl core::fmt::Display for StageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gesture" | "sign" => Ok(StageKind::Gesture),
            "emotion" => Ok(StageKind::Emotion),
            "language" | "gemini" => Ok(StageKind::Language),
            "speech" | "tts" => Ok(StageKind::Speech),
            other => Err(DomainError::unknown("stage", other)),
        }
    }
}

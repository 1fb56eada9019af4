//! Partial results contributed by individual stages toward one job.

use std::collections::BTreeMap;

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::stage::StageKind;

/// A named partial-result field in the job state store.
///
/// Each field has exactly one owning stage; no other stage writes it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobField {
    RawGloss,
    DominantEmotion,
    Sentence,
    Tone,
    Audio,
}

impl JobField {
    pub const ALL: [JobField; 5] = [
        JobField::RawGloss,
        JobField::DominantEmotion,
        JobField::Sentence,
        JobField::Tone,
        JobField::Audio,
    ];

    /// Field name as stored (hash field in Redis).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobField::RawGloss => "raw_gloss",
            JobField::DominantEmotion => "dominant_emotion",
            JobField::Sentence => "sentence",
            JobField::Tone => "tone",
            JobField::Audio => "audio",
        }
    }

    pub fn owner(&self) -> StageKind {
        match self {
            JobField::RawGloss => StageKind::Gesture,
            JobField::DominantEmotion => StageKind::Emotion,
            JobField::Sentence | JobField::Tone => StageKind::Language,
            JobField::Audio => StageKind::Speech,
        }
    }
}

impl core::fmt::Display for JobField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| DomainError::unknown("job field", s))
    }
}

/// Which first-stage partial a notification announces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartReceived {
    Sign,
    Emotion,
}

impl PartReceived {
    /// The store field the announced partial was written to.
    pub fn field(&self) -> JobField {
        match self {
            PartReceived::Sign => JobField::RawGloss,
            PartReceived::Emotion => JobField::DominantEmotion,
        }
    }
}

/// The fields written so far for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFields(BTreeMap<JobField, String>);

impl JobFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert; last write wins.
    pub fn set(&mut self, field: JobField, value: impl Into<String>) {
        self.0.insert(field, value.into());
    }

    pub fn get(&self, field: JobField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: JobField) -> bool {
        self.0.contains_key(&field)
    }

    /// Required fields not yet written, in the order given.
    pub fn missing(&self, required: &[JobField]) -> Vec<JobField> {
        required
            .iter()
            .copied()
            .filter(|f| !self.contains(*f))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobField, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl FromIterator<(JobField, String)> for JobFields {
    fn from_iter<I: IntoIterator<Item = (JobField, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use aurasign_ai::{CapabilityError, SpeechSynthesizer};
use aurasign_core::{FinalResult, JobField, SpeechJob, StageKind};

use super::{Publication, Stage, StageError, StageOutcome};

/// Terminal stage: synthesise audio and reply to the caller.
pub struct SpeechStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl SpeechStage {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl Stage for SpeechStage {
    type Input = SpeechJob;

    fn kind(&self) -> StageKind {
        StageKind::Speech
    }

    async fn process(&self, input: &SpeechJob) -> Result<StageOutcome, StageError> {
        let audio = self
            .synthesizer
            .synthesize(&input.sentence, input.emotion.as_deref())
            .await?;
        if audio.is_empty() {
            let err = CapabilityError::InvalidResponse("synthesizer returned no audio".into());
            return Err(err.into());
        }

        let audio_data = STANDARD.encode(&audio);
        debug!(bytes = audio.len(), "speech synthesised");

        let result = FinalResult {
            sentence: input.sentence.clone(),
            audio_data: audio_data.clone(),
            conversation_tone: input.tone_or_default().to_string(),
        };

        Ok(StageOutcome::new(Publication::Reply(result)).write(JobField::Audio, audio_data))
    }
}

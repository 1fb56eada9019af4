use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use aurasign_ai::{SentenceGenerator, interpretation_prompt, parse_interpretation};
use aurasign_core::{JobField, LanguageJob, SpeechJob, StageKind};
use aurasign_events::routing;

use super::{Publication, Stage, StageError, StageOutcome};

/// Gloss + emotion to a natural sentence and conversational tone.
pub struct LanguageStage {
    generator: Arc<dyn SentenceGenerator>,
}

impl LanguageStage {
    pub fn new(generator: Arc<dyn SentenceGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for LanguageStage {
    type Input = LanguageJob;

    fn kind(&self) -> StageKind {
        StageKind::Language
    }

    async fn process(&self, input: &LanguageJob) -> Result<StageOutcome, StageError> {
        let prompt = interpretation_prompt(&input.raw_gloss, &input.dominant_emotion);
        let reply = self.generator.generate(&prompt).await?;
        let interpretation = parse_interpretation(&reply)?;
        debug!(sentence = %interpretation.sentence, tone = %interpretation.tone, "interpreted");

        let body = SpeechJob {
            sentence: interpretation.sentence.clone(),
            emotion: Some(input.dominant_emotion.clone()),
            tone: Some(interpretation.tone.clone()),
        };

        Ok(StageOutcome::new(Publication::Forward {
            routing_key: routing::SPEECH,
            body,
        })
        .write(JobField::Sentence, interpretation.sentence)
        .write(JobField::Tone, interpretation.tone))
    }
}

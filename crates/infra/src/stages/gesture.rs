use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use aurasign_ai::{GlossDecoder, SignClassifier};
use aurasign_ai::gloss::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_SMOOTHING_WINDOW};
use aurasign_core::{JobField, PartReceived, RecognitionJob, StageKind};

use super::{Publication, Stage, StageError, StageOutcome};

/// Sign recognition: one prediction per window, decoded into a gloss.
pub struct GestureStage {
    classifier: Arc<dyn SignClassifier>,
    threshold: f32,
    smoothing_window: usize,
}

impl GestureStage {
    pub fn new(classifier: Arc<dyn SignClassifier>) -> Self {
        Self {
            classifier,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl Stage for GestureStage {
    type Input = RecognitionJob;

    fn kind(&self) -> StageKind {
        StageKind::Gesture
    }

    async fn process(&self, input: &RecognitionJob) -> Result<StageOutcome, StageError> {
        let mut decoder = GlossDecoder::with_params(self.threshold, self.smoothing_window);

        for window in &input.landmark_data {
            let prediction = self.classifier.predict(window).await?;
            if let Some(label) = decoder.push(&prediction) {
                debug!(label, confidence = prediction.confidence, "gloss token accepted");
            }
        }

        let raw_gloss = decoder.finish();
        if raw_gloss.is_empty() {
            warn!(
                windows = input.landmark_data.len(),
                threshold = self.threshold,
                "no sign cleared the confidence threshold; gloss is empty"
            );
        } else {
            debug!(raw_gloss = %raw_gloss, "gloss decoded");
        }

        Ok(StageOutcome::new(Publication::Notify(PartReceived::Sign))
            .write(JobField::RawGloss, raw_gloss))
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use aurasign_ai::{CapabilityError, EmotionClassifier, dominant_emotion, face_features};
use aurasign_core::{JobField, PartReceived, RecognitionJob, StageKind};

use super::{Publication, Stage, StageError, StageOutcome};

/// Facial emotion: classify every frame that carries a face, then vote.
///
/// Frames without a face, or that the classifier rejects, do not vote.
pub struct EmotionStage {
    classifier: Arc<dyn EmotionClassifier>,
}

impl EmotionStage {
    pub fn new(classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage for EmotionStage {
    type Input = RecognitionJob;

    fn kind(&self) -> StageKind {
        StageKind::Emotion
    }

    async fn process(&self, input: &RecognitionJob) -> Result<StageOutcome, StageError> {
        let mut votes = Vec::new();
        let mut skipped = 0usize;

        for frame in input.frames() {
            let Some(features) = face_features(frame) else {
                skipped += 1;
                continue;
            };
            match self.classifier.classify(&features).await {
                Ok(label) => votes.push(label),
                // A frame the model cannot score is skipped; an unreachable model fails the job.
                Err(err @ (CapabilityError::Rejected(_) | CapabilityError::InvalidResponse(_))) => {
                    debug!(error = %err, "frame not classified");
                    skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let dominant = dominant_emotion(votes.iter().map(String::as_str));
        debug!(votes = votes.len(), skipped, dominant = %dominant, "emotion voted");

        Ok(StageOutcome::new(Publication::Notify(PartReceived::Emotion))
            .write(JobField::DominantEmotion, dominant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use aurasign_ai::emotion::{FACE_OFFSET, FACE_VALUES};

    /// Answers `sad` on the second call and `happy` otherwise.
    #[derive(Default)]
    struct ByMarker(AtomicUsize);

    #[async_trait]
    impl EmotionClassifier for ByMarker {
        async fn classify(&self, _features: &[f32]) -> Result<String, CapabilityError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(if n == 1 { "sad" } else { "happy" }.to_string())
        }
    }

    fn face_frame() -> Vec<f32> {
        (0..FACE_OFFSET + FACE_VALUES).map(|i| i as f32 * 0.001).collect()
    }

    #[tokio::test]
    async fn votes_over_frames_and_skips_short_ones() {
        let classifier = Arc::new(ByMarker::default());
        let job = RecognitionJob {
            landmark_data: vec![
                vec![face_frame(), vec![0.5; 10]],
                vec![face_frame(), face_frame()],
            ],
        };

        let outcome = EmotionStage::new(classifier.clone()).process(&job).await.unwrap();

        assert_eq!(classifier.0.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.publication, Publication::Notify(PartReceived::Emotion));
        assert_eq!(outcome.writes, vec![(JobField::DominantEmotion, "happy".to_string())]);
    }

    #[tokio::test]
    async fn no_face_means_neutral() {
        let classifier = Arc::new(ByMarker::default());
        let job = RecognitionJob {
            landmark_data: vec![vec![vec![0.0; 3]]],
        };

        let outcome = EmotionStage::new(classifier.clone()).process(&job).await.unwrap();

        assert_eq!(classifier.0.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.writes[0].1, aurasign_ai::emotion::NEUTRAL);
    }

    /// Fails on the `nth` call (0-based) with `error`, answers `happy` otherwise.
    struct FailsOnce {
        calls: AtomicUsize,
        nth: usize,
        error: CapabilityError,
    }

    #[async_trait]
    impl EmotionClassifier for FailsOnce {
        async fn classify(&self, _features: &[f32]) -> Result<String, CapabilityError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.nth {
                return Err(self.error.clone());
            }
            Ok("happy".to_string())
        }
    }

    fn three_faces() -> RecognitionJob {
        RecognitionJob {
            landmark_data: vec![vec![face_frame(), face_frame(), face_frame()]],
        }
    }

    #[tokio::test]
    async fn rejected_frame_is_skipped_and_the_rest_still_vote() {
        let classifier = Arc::new(FailsOnce {
            calls: AtomicUsize::new(0),
            nth: 1,
            error: CapabilityError::Rejected("422: feature count mismatch".into()),
        });

        let outcome = EmotionStage::new(classifier.clone())
            .process(&three_faces())
            .await
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.writes, vec![(JobField::DominantEmotion, "happy".to_string())]);
    }

    #[tokio::test]
    async fn unreadable_reply_for_a_frame_is_skipped() {
        let classifier = Arc::new(FailsOnce {
            calls: AtomicUsize::new(0),
            nth: 0,
            error: CapabilityError::InvalidResponse("missing label".into()),
        });

        let outcome = EmotionStage::new(classifier).process(&three_faces()).await.unwrap();
        assert_eq!(outcome.writes[0].1, "happy");
    }

    #[tokio::test]
    async fn unavailable_classifier_fails_the_job() {
        let classifier = Arc::new(FailsOnce {
            calls: AtomicUsize::new(0),
            nth: 1,
            error: CapabilityError::Unavailable("connection refused".into()),
        });

        let err = EmotionStage::new(classifier).process(&three_faces()).await.unwrap_err();
        assert!(matches!(err, StageError::Capability(CapabilityError::Unavailable(_))));
    }
}

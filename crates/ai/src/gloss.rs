//! Turning per-window sign predictions into a gloss string.

use std::collections::VecDeque;

use crate::capability::Prediction;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.9;
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

/// Stateful decoder for one job.
///
/// Model:
/// - A prediction below `threshold` is noise and resets the smoothing window.
/// - A confident label already in the window is a repeat of a recent sign and is suppressed.
/// - Accepted labels that equal the previous gloss token are dropped.
///
/// Never share a decoder across jobs: the smoothing window is job state.
#[derive(Debug, Clone)]
pub struct GlossDecoder {
    threshold: f32,
    recent: VecDeque<String>,
    capacity: usize,
    tokens: Vec<String>,
}

impl GlossDecoder {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_SMOOTHING_WINDOW)
    }

    pub fn with_params(threshold: f32, window: usize) -> Self {
        let capacity = window.max(1);
        Self {
            threshold,
            recent: VecDeque::with_capacity(capacity),
            capacity,
            tokens: Vec::new(),
        }
    }

    /// Feed one window's prediction. Returns the label if it was accepted into the gloss.
    pub fn push(&mut self, prediction: &Prediction) -> Option<&str> {
        if prediction.confidence < self.threshold {
            self.recent.clear();
            return None;
        }
        if self.recent.iter().any(|l| *l == prediction.label) {
            return None;
        }

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(prediction.label.clone());

        if self.tokens.last() == Some(&prediction.label) {
            return None;
        }
        self.tokens.push(prediction.label.clone());
        self.tokens.last().map(String::as_str)
    }

    /// The gloss so far, tokens separated by single spaces. Empty if nothing was accepted.
    pub fn finish(self) -> String {
        self.tokens.join(" ")
    }
}

impl Default for GlossDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(preds: &[(&str, f32)]) -> String {
        let mut decoder = GlossDecoder::new();
        for (label, confidence) in preds {
            decoder.push(&Prediction::new(*label, *confidence));
        }
        decoder.finish()
    }

    #[test]
    fn confident_labels_join_with_spaces() {
        assert_eq!(
            decode(&[("hello", 0.95), ("thanks", 0.97), ("iloveyou", 0.99)]),
            "hello thanks iloveyou"
        );
    }

    #[test]
    fn low_confidence_is_dropped() {
        assert_eq!(decode(&[("hello", 0.5), ("thanks", 0.91)]), "thanks");
        assert_eq!(decode(&[("hello", 0.2)]), "");
    }

    #[test]
    fn label_inside_smoothing_window_is_suppressed() {
        assert_eq!(
            decode(&[("hello", 0.95), ("thanks", 0.95), ("hello", 0.95)]),
            "hello thanks"
        );
    }

    #[test]
    fn low_confidence_resets_smoothing_window() {
        assert_eq!(
            decode(&[("hello", 0.95), ("thanks", 0.95), ("noise", 0.1), ("hello", 0.95)]),
            "hello thanks hello"
        );
    }

    #[test]
    fn consecutive_duplicates_collapse_after_reset() {
        assert_eq!(
            decode(&[("hello", 0.95), ("noise", 0.1), ("hello", 0.95)]),
            "hello"
        );
    }

    #[test]
    fn window_evicts_oldest_label() {
        assert_eq!(
            decode(&[("a", 0.95), ("b", 0.95), ("c", 0.95), ("d", 0.95), ("a", 0.95)]),
            "a b c d a"
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(decode(&[("hello", DEFAULT_CONFIDENCE_THRESHOLD)]), "hello");
    }

    fn predictions() -> impl Strategy<Value = Vec<(String, f32)>> {
        let label = prop::sample::select(vec!["hello", "thanks", "yes", "no", "iloveyou"]);
        prop::collection::vec((label.prop_map(str::to_string), 0.0f32..=1.0), 0..40)
    }

    proptest! {
        #[test]
        fn gloss_never_repeats_a_token_back_to_back(preds in predictions()) {
            let refs: Vec<(&str, f32)> = preds.iter().map(|(l, c)| (l.as_str(), *c)).collect();
            let gloss = decode(&refs);
            let tokens: Vec<&str> = gloss.split_whitespace().collect();

            prop_assert!(tokens.windows(2).all(|pair| pair[0] != pair[1]));
            prop_assert_eq!(tokens.join(" "), gloss.clone());
        }

        #[test]
        fn every_token_had_a_confident_prediction(preds in predictions()) {
            let refs: Vec<(&str, f32)> = preds.iter().map(|(l, c)| (l.as_str(), *c)).collect();
            let gloss = decode(&refs);

            for token in gloss.split_whitespace() {
                prop_assert!(preds
                    .iter()
                    .any(|(l, c)| l == token && *c >= DEFAULT_CONFIDENCE_THRESHOLD));
            }
        }
    }
}

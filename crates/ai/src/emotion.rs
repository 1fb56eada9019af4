//! Facial-landmark preprocessing and per-job emotion voting.

use std::collections::HashMap;

/// Pose (33 × 4) + left hand (21 × 3) + right hand (21 × 3).
pub const FACE_OFFSET: usize = 132 + 63 + 63;
pub const FACE_POINTS: usize = 468;
/// 468 points × (x, y, z).
pub const FACE_VALUES: usize = FACE_POINTS * 3;

pub const NEUTRAL: &str = "neutral";

const MIN_SCALE: f32 = 1e-8;

/// Extract and normalise the face landmarks from one holistic keypoint frame.
///
/// Points are centred on their mean and divided by the largest absolute
/// coordinate, so the result is translation and scale invariant. Returns
/// `None` for frames too short to contain a face.
pub fn face_features(frame: &[f32]) -> Option<Vec<f32>> {
    let face = frame.get(FACE_OFFSET..FACE_OFFSET + FACE_VALUES)?;

    let mut mean = [0.0f32; 3];
    for point in face.chunks_exact(3) {
        for (axis, value) in point.iter().enumerate() {
            mean[axis] += value;
        }
    }
    for axis in &mut mean {
        *axis /= FACE_POINTS as f32;
    }

    let mut centred: Vec<f32> = face
        .chunks_exact(3)
        .flat_map(|point| (0..3).map(move |axis| point[axis] - mean[axis]))
        .collect();

    let scale = centred
        .iter()
        .fold(0.0f32, |acc, v| acc.max(v.abs()))
        .max(MIN_SCALE);
    for value in &mut centred {
        *value /= scale;
    }

    Some(centred)
}

/// The most frequent label; ties go to the label seen first.
/// `neutral` when there are no votes.
pub fn dominant_emotion<I, S>(labels: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for label in labels {
        let label = label.into();
        let count = counts.entry(label.clone()).or_insert(0);
        if *count == 0 {
            order.push(label);
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for label in &order {
        let count = counts.get(label).copied().unwrap_or(0);
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((label.as_str(), count));
        }
    }

    best.map_or_else(|| NEUTRAL.to_string(), |(label, _)| label.to_string())
}

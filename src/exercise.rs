// src/exercise.rs
//
// Strongly-typed exercise profiles, validated once at construction.
// Replaces runtime string indexing: the joint triplet used for the angle
// is an explicit field, independent of the highlight point list.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// COCO keypoint layout produced by the pose model.
pub const KEYPOINT_COUNT: usize = 17;

/// Flattened (x, y) features per frame fed to the classifier.
pub const FEATURES_PER_FRAME: usize = KEYPOINT_COUNT * 2;

#[derive(Debug, Clone, Copy)]
pub struct PhaseThresholds {
    /// Angles strictly under this are the "below" phase (degrees).
    pub below: f32,
    /// Angles strictly over this are the "above" phase (degrees).
    pub above: f32,
}

#[derive(Debug, Clone)]
pub struct LabelFeedback {
    pub label: String,
    pub error_text: String,
    pub correction_text: String,
    /// Whether this label denotes correct form (drives skeleton color).
    pub favorable: bool,
}

#[derive(Debug, Clone)]
pub struct ExerciseProfile {
    pub id: String,
    /// Sequence length required by the classifier; equals the history
    /// buffer capacity.
    pub timesteps: usize,
    pub model_path: String,
    /// Keypoints re-drawn in the highlight color.
    pub interest_points: Vec<usize>,
    /// The (a, b, c) joint indices for the phase angle, in order.
    pub angle_triplet: [usize; 3],
    pub thresholds: PhaseThresholds,
    /// Ordered to match the classifier's output width.
    pub labels: Vec<LabelFeedback>,
}

impl ExerciseProfile {
    pub fn validate(&self) -> Result<()> {
        if self.timesteps == 0 {
            bail!("profile '{}': timesteps must be at least 1", self.id);
        }
        if self.labels.is_empty() {
            bail!("profile '{}': label set is empty", self.id);
        }
        for &idx in &self.angle_triplet {
            if idx >= KEYPOINT_COUNT {
                bail!(
                    "profile '{}': angle joint index {} out of range (model has {} keypoints)",
                    self.id,
                    idx,
                    KEYPOINT_COUNT
                );
            }
        }
        for &idx in &self.interest_points {
            if idx >= KEYPOINT_COUNT {
                bail!(
                    "profile '{}': interest point {} out of range (model has {} keypoints)",
                    self.id,
                    idx,
                    KEYPOINT_COUNT
                );
            }
        }
        Ok(())
    }

    /// The classifier bound to this profile must produce exactly one
    /// probability per label.
    pub fn check_classifier_width(&self, output_width: usize) -> Result<()> {
        if output_width != self.labels.len() {
            bail!(
                "profile '{}': classifier outputs {} classes but profile has {} labels",
                self.id,
                output_width,
                self.labels.len()
            );
        }
        Ok(())
    }
}

fn feedback(label: &str, error: &str, correction: &str, favorable: bool) -> LabelFeedback {
    LabelFeedback {
        label: label.to_string(),
        error_text: error.to_string(),
        correction_text: correction.to_string(),
        favorable,
    }
}

pub struct ExerciseRegistry {
    profiles: HashMap<String, Arc<ExerciseProfile>>,
}

impl ExerciseRegistry {
    /// Built-in profiles. Each is validated before the registry is usable.
    pub fn builtin() -> Result<Self> {
        let deadlift = ExerciseProfile {
            id: "deadlift".to_string(),
            timesteps: 30,
            model_path: "models/deadlift_lstm.onnx".to_string(),
            interest_points: vec![5, 11, 13],
            angle_triplet: [5, 11, 13],
            thresholds: PhaseThresholds {
                below: 140.0,
                above: 175.0,
            },
            labels: vec![
                feedback(
                    "spine_fault",
                    "error: rounded spine",
                    "correction: keep a neutral back through the descent and lift",
                    false,
                ),
                feedback(
                    "spine_ok",
                    "correct: neutral spine",
                    "good back position",
                    true,
                ),
                feedback(
                    "lockout_fault",
                    "error: over-extension or incomplete lockout",
                    "correction: finish with shoulders stacked over the hips",
                    false,
                ),
                feedback(
                    "lockout_ok",
                    "correct: clean lockout",
                    "good position at the top",
                    true,
                ),
            ],
        };

        let squat = ExerciseProfile {
            id: "squat".to_string(),
            timesteps: 60,
            model_path: "models/squat_lstm.onnx".to_string(),
            interest_points: vec![5, 11, 13, 6, 12, 14],
            angle_triplet: [5, 11, 13],
            thresholds: PhaseThresholds {
                below: 90.0,
                above: 160.0,
            },
            labels: vec![
                feedback(
                    "hips_fault",
                    "error: incorrect hip path",
                    "correction: drive the hips straight down and up",
                    false,
                ),
                feedback("hips_ok", "correct: good hip path", "good technique", true),
                feedback(
                    "knees_fault",
                    "error: knees caving inward",
                    "correction: keep the knees tracking slightly outward",
                    false,
                ),
                feedback(
                    "knees_ok",
                    "correct: knees tracking well",
                    "good knee position",
                    true,
                ),
            ],
        };

        let mut profiles = HashMap::new();
        for profile in [deadlift, squat] {
            profile.validate()?;
            profiles.insert(profile.id.clone(), Arc::new(profile));
        }
        Ok(Self { profiles })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ExerciseProfile>> {
        self.profiles.get(id).cloned()
    }

    /// Resolve a client-requested exercise, falling back to the configured
    /// default when the request is absent or unknown.
    pub fn resolve(&self, requested: Option<&str>, default: &str) -> Option<Arc<ExerciseProfile>> {
        if let Some(id) = requested {
            if let Some(profile) = self.get(id) {
                return Some(profile);
            }
            warn!("Unknown exercise '{}', falling back to '{}'", id, default);
        }
        self.get(default)
    }
}

// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub pose_model_path: String,
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_exercise: String,
    /// Run live pose detection once every N frames; cached in between.
    pub detection_interval: u32,
    /// Run sequence classification every M full-buffer frames (phase
    /// changes bypass this).
    pub prediction_interval: u32,
    /// Concurrent pose-detection calls allowed across all sessions.
    pub offload_workers: usize,
    /// Pending feedback events before best-effort drop kicks in.
    pub feedback_queue: usize,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            pose_model_path: "models/yolo11n-pose.onnx".to_string(),
            input_size: 640,
            confidence_threshold: 0.5,
            num_threads: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_exercise: "deadlift".to_string(),
            detection_interval: 3,
            prediction_interval: 5,
            offload_workers: 2,
            feedback_queue: 16,
            debug: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// FRAME TYPES
// ============================================================================

/// Presentation time base as a rational (numerator / denominator), carried
/// through the pipeline untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };
}

/// Raw BGR24 image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl FrameImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![0; width * height * 3],
            width,
            height,
        }
    }
}

/// One video frame with its timing metadata. The pipeline must emit every
/// frame it receives with `pts` and `time_base` unchanged.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: FrameImage,
    pub pts: i64,
    pub time_base: TimeBase,
}

// ============================================================================
// POSE TYPES
// ============================================================================

/// One subject's keypoints for one frame: the flattened normalized (x, y)
/// vector fed to the classifier, plus the same keypoints in canonical pixel
/// coordinates for drawing. Immutable after creation.
#[derive(Debug, Clone)]
pub struct KeypointObservation {
    pub normalized: Vec<f32>,
    pub pixel: Vec<[f32; 2]>,
}

/// Detector output for a frame with a subject present.
#[derive(Debug, Clone)]
pub struct PoseDetection {
    pub observation: KeypointObservation,
    pub annotated: FrameImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkeletonColor {
    Favorable,
    Unfavorable,
}

impl SkeletonColor {
    /// Highlight color in BGR.
    pub fn bgr(self) -> (u8, u8, u8) {
        match self {
            SkeletonColor::Favorable => (0, 255, 0),
            SkeletonColor::Unfavorable => (0, 0, 255),
        }
    }
}

/// Outcome of one sequence-classification run. Supersedes the previous
/// result; lives until the next classification.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    pub color: SkeletonColor,
    pub error_text: String,
    pub correction_text: String,
}

/// Best-effort feedback pushed over the signaling channel for TTS playback.
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub error_text: String,
    pub correction_text: String,
    pub confidence: f32,
}

impl FeedbackEvent {
    pub fn message(&self) -> String {
        format!(
            "{}\n{}\nConf: {:.2}",
            self.error_text, self.correction_text, self.confidence
        )
    }
}

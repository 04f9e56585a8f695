// src/detector.rs
//
// Pose estimation seam. The pipeline only sees the PoseDetector trait;
// the ONNX implementation wraps a YOLO-pose model and selects the
// largest-bounding-box subject when several are present.

use crate::exercise::KEYPOINT_COUNT;
use crate::overlay;
use crate::types::{FrameImage, KeypointObservation, ModelConfig, PoseDetection};
use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::sync::Mutex;
use tracing::{debug, info};

/// Blocking pose estimation: image in, at most one subject out.
/// Implementations are shared across sessions and called from the offload
/// pool, so they must be Send + Sync.
pub trait PoseDetector: Send + Sync {
    fn detect(&self, image: &FrameImage) -> Result<Option<PoseDetection>>;
}

// cx, cy, w, h, box confidence, then (x, y, conf) per keypoint
const OUTPUT_CHANNELS: usize = 5 + KEYPOINT_COUNT * 3;

pub struct OnnxPoseDetector {
    // ort sessions need &mut to run; the offload pool's admission limit
    // bounds contention on this lock.
    session: Mutex<Session>,
    input_size: usize,
    confidence_threshold: f32,
}

impl OnnxPoseDetector {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Initializing pose detector");
        info!("Model path: {}", config.pose_model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(&config.pose_model_path)
            .context("Failed to load pose model")?;

        info!("✓ Pose detector ready");

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
        })
    }

    fn run_model(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        let shape = [1, 3, self.input_size, self.input_size];
        let (data, _) = input.into_raw_vec_and_offset();
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), data.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("pose session lock poisoned"))?;
        let outputs = session.run(ort::inputs!["images" => input_value])?;
        let (_, data_slice) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(data_slice.to_vec())
    }
}

impl PoseDetector for OnnxPoseDetector {
    fn detect(&self, image: &FrameImage) -> Result<Option<PoseDetection>> {
        let size = self.input_size;
        let canonical = overlay::resize_nearest(image, size, size);

        // BGR bytes → normalized RGB CHW
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let i = (y * size + x) * 3;
                input[[0, 0, y, x]] = canonical.data[i + 2] as f32 / 255.0;
                input[[0, 1, y, x]] = canonical.data[i + 1] as f32 / 255.0;
                input[[0, 2, y, x]] = canonical.data[i] as f32 / 255.0;
            }
        }

        let output = self.run_model(input)?;
        if output.len() % OUTPUT_CHANNELS != 0 {
            bail!(
                "unexpected pose output size {} (not divisible by {} channels)",
                output.len(),
                OUTPUT_CHANNELS
            );
        }
        let anchors = output.len() / OUTPUT_CHANNELS;
        let at = |channel: usize, anchor: usize| output[channel * anchors + anchor];

        // Largest-area box above the confidence threshold wins.
        let mut best: Option<(usize, f32)> = None;
        for i in 0..anchors {
            if at(4, i) < self.confidence_threshold {
                continue;
            }
            let area = at(2, i) * at(3, i);
            if best.map_or(true, |(_, a)| area > a) {
                best = Some((i, area));
            }
        }

        let Some((subject, _)) = best else {
            debug!("No subject in frame");
            return Ok(None);
        };

        let mut normalized = Vec::with_capacity(KEYPOINT_COUNT * 2);
        let mut pixel = Vec::with_capacity(KEYPOINT_COUNT);
        for k in 0..KEYPOINT_COUNT {
            let x = at(5 + k * 3, subject);
            let y = at(5 + k * 3 + 1, subject);
            normalized.push(x / size as f32);
            normalized.push(y / size as f32);
            pixel.push([x, y]);
        }

        let mut annotated = canonical;
        overlay::draw_keypoints(&mut annotated, &pixel, overlay::BASE_COLOR);

        Ok(Some(PoseDetection {
            observation: KeypointObservation { normalized, pixel },
            annotated,
        }))
    }
}

// src/classifier.rs
//
// Temporal-sequence classification seam. Cheap relative to detection, so
// it runs inline on the session task rather than on the offload pool.

use anyhow::{bail, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

/// Fixed-length keypoint sequence in, probability distribution out.
/// One instance per session; classify takes &mut so implementations can
/// own their runtime state directly.
pub trait SequenceClassifier: Send {
    fn classify(&mut self, sequence: &[f32], timesteps: usize, features: usize)
        -> Result<Vec<f32>>;

    fn output_width(&self) -> usize;
}

pub struct OnnxSequenceClassifier {
    session: Session,
    output_width: usize,
}

impl OnnxSequenceClassifier {
    pub fn load(path: &Path, output_width: usize) -> Result<Self> {
        info!("Loading sequence classifier: {}", path.display());
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)
            .context("Failed to load sequence classifier model")?;
        Ok(Self {
            session,
            output_width,
        })
    }
}

impl SequenceClassifier for OnnxSequenceClassifier {
    fn classify(
        &mut self,
        sequence: &[f32],
        timesteps: usize,
        features: usize,
    ) -> Result<Vec<f32>> {
        if sequence.len() != timesteps * features {
            bail!(
                "sequence length {} does not match {} timesteps × {} features",
                sequence.len(),
                timesteps,
                features
            );
        }

        let shape = [1, timesteps, features];
        let input_value = ort::value::Value::from_array((
            shape.as_slice(),
            sequence.to_vec().into_boxed_slice(),
        ))?;
        let outputs = self.session.run(ort::inputs!["input" => input_value])?;
        let (_, data_slice) = outputs[0].try_extract_tensor::<f32>()?;

        if data_slice.len() != self.output_width {
            bail!(
                "classifier produced {} values, expected {}",
                data_slice.len(),
                self.output_width
            );
        }
        Ok(data_slice.to_vec())
    }

    fn output_width(&self) -> usize {
        self.output_width
    }
}

/// Index and probability of the most likely class.
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

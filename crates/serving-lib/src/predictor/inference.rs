//! ONNX inference using tract
//!
//! Runs an exported hazard classifier (first output = predicted label)
//! over feature rows.

use super::Classifier;
use crate::models::{FeatureRecord, FEATURE_COUNT};
use anyhow::{Context, Result};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Batch latency before warning
const MAX_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX-based hazard classifier
pub struct OnnxClassifier {
    model: TractModel,
}

impl OnnxClassifier {
    /// Create a classifier from model bytes
    pub fn new(model_bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            model: Self::load_model(model_bytes)?,
        })
    }

    /// Load and optimize an ONNX model from bytes
    fn load_model(model_bytes: &[u8]) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, FEATURE_COUNT]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    fn record_to_tensor(record: &FeatureRecord) -> Result<Tensor> {
        let data: Vec<f32> = record.to_array().iter().map(|v| *v as f32).collect();
        Tensor::from_shape(&[1, FEATURE_COUNT], &data).context("Failed to build input tensor")
    }

    fn predict_one(&self, record: &FeatureRecord) -> Result<i64> {
        let input = Self::record_to_tensor(record)?;
        let result = self.model.run(tvec!(input.into()))?;
        let output = result.first().context("No output from model")?;
        let labels = output
            .cast_to::<i64>()
            .context("Model output is not a label tensor")?;
        let view = labels.to_array_view::<i64>()?;
        view.iter().next().copied().context("Empty model output")
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: &[FeatureRecord]) -> Result<Vec<i64>> {
        let start = Instant::now();
        let labels = features
            .iter()
            .map(|r| self.predict_one(r))
            .collect::<Result<Vec<_>>>()?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                rows = features.len(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(elapsed_us = elapsed.as_micros(), rows = features.len(), "Inference completed");
        }

        Ok(labels)
    }

    fn kind(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage_bytes() {
        let result = OnnxClassifier::new(b"definitely not a protobuf model");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_model() {
        assert!(OnnxClassifier::new(&[]).is_err());
    }
}

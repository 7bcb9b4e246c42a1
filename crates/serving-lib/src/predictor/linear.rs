//! Logistic-regression classifier shipped as a JSON artifact
//!
//! ```json
//! {"weights": [..10 values..], "bias": -1.5, "threshold": 0.5}
//! ```

use super::Classifier;
use crate::models::{FeatureRecord, FEATURE_COUNT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl LinearClassifier {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let model: Self =
            serde_json::from_slice(bytes).context("Failed to parse linear model artifact")?;
        if model.weights.len() != FEATURE_COUNT {
            anyhow::bail!(
                "Linear model has {} weights, expected {}",
                model.weights.len(),
                FEATURE_COUNT
            );
        }
        if !(0.0..=1.0).contains(&model.threshold) {
            anyhow::bail!("Decision threshold {} outside [0, 1]", model.threshold);
        }
        Ok(model)
    }

    /// Probability of the hazardous class
    pub fn probability(&self, record: &FeatureRecord) -> f64 {
        let z: f64 = record
            .to_array()
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.bias;
        1.0 / (1.0 + (-z).exp())
    }
}

impl Classifier for LinearClassifier {
    fn predict(&self, features: &[FeatureRecord]) -> Result<Vec<i64>> {
        Ok(features
            .iter()
            .map(|r| i64::from(self.probability(r) >= self.threshold))
            .collect())
    }

    fn kind(&self) -> &'static str {
        "linear"
    }
}

//! Feature derivation and hazard classification

mod features;
mod inference;
mod linear;

pub use features::{
    Degeneracy, DegeneracyKind, DegeneracyPolicy, FeatureBatch, FeatureEngineer, FeatureError,
    DEGENERACY_SENTINEL,
};
pub use inference::OnnxClassifier;
pub use linear::LinearClassifier;

use crate::models::FeatureRecord;
use crate::registry::ModelArtifact;
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::fmt;

/// Trait for classifier implementations
pub trait Classifier: Send + Sync {
    /// One label per feature row, in row order
    fn predict(&self, features: &[FeatureRecord]) -> Result<Vec<i64>>;

    /// Short name of the artifact format
    fn kind(&self) -> &'static str;
}

/// Artifact encodings understood by [`ModelHandle::from_artifact`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Onnx,
    Linear,
}

impl ArtifactFormat {
    /// Pick the format from the artifact path extension
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "onnx" => Some(Self::Onnx),
            "json" => Some(Self::Linear),
            _ => None,
        }
    }
}

/// A loaded classifier bound to the registry coordinates it was resolved from
pub struct ModelHandle {
    name: String,
    stage: String,
    version: String,
    checksum: String,
    loaded_at: i64,
    classifier: Box<dyn Classifier>,
}

impl ModelHandle {
    /// Decode a registry artifact into a ready classifier
    pub fn from_artifact(artifact: &ModelArtifact) -> Result<Self> {
        let format = ArtifactFormat::from_path(&artifact.path).ok_or_else(|| {
            anyhow::anyhow!("Unsupported model artifact type: {}", artifact.path)
        })?;
        let classifier: Box<dyn Classifier> = match format {
            ArtifactFormat::Onnx => Box::new(OnnxClassifier::new(&artifact.bytes)?),
            ArtifactFormat::Linear => Box::new(LinearClassifier::from_json(&artifact.bytes)?),
        };
        Ok(Self::with_classifier(artifact, classifier))
    }

    /// Bind an already-built classifier to an artifact's coordinates
    pub fn with_classifier(artifact: &ModelArtifact, classifier: Box<dyn Classifier>) -> Self {
        Self {
            name: artifact.name.clone(),
            stage: artifact.stage.clone(),
            version: artifact.version.clone(),
            checksum: compute_checksum(&artifact.bytes),
            loaded_at: chrono::Utc::now().timestamp(),
            classifier,
        }
    }

    pub fn predict(&self, features: &[FeatureRecord]) -> Result<Vec<i64>> {
        let labels = self.classifier.predict(features)?;
        if labels.len() != features.len() {
            anyhow::bail!(
                "Model returned {} labels for {} rows",
                labels.len(),
                features.len()
            );
        }
        Ok(labels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA256 of the artifact bytes
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn loaded_at(&self) -> i64 {
        self.loaded_at
    }

    pub fn kind(&self) -> &'static str {
        self.classifier.kind()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("version", &self.version)
            .field("kind", &self.classifier.kind())
            .finish()
    }
}

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FEATURE_COUNT;

    fn linear_artifact() -> ModelArtifact {
        let body = serde_json::json!({"weights": vec![0.0; FEATURE_COUNT], "bias": 3.0});
        ModelArtifact {
            name: "neo-prediction".to_string(),
            stage: "Production".to_string(),
            version: "4".to_string(),
            path: "model.json".to_string(),
            bytes: body.to_string().into_bytes(),
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ArtifactFormat::from_path("model.onnx"), Some(ArtifactFormat::Onnx));
        assert_eq!(ArtifactFormat::from_path("dir/model.JSON"), Some(ArtifactFormat::Linear));
        assert_eq!(ArtifactFormat::from_path("model.pkl"), None);
        assert_eq!(ArtifactFormat::from_path("model"), None);
    }

    #[test]
    fn test_handle_from_linear_artifact() {
        let artifact = linear_artifact();
        let handle = ModelHandle::from_artifact(&artifact).unwrap();

        assert_eq!(handle.name(), "neo-prediction");
        assert_eq!(handle.stage(), "Production");
        assert_eq!(handle.version(), "4");
        assert_eq!(handle.kind(), "linear");
        assert_eq!(handle.checksum(), compute_checksum(&artifact.bytes));
        assert_eq!(handle.checksum().len(), 64);
    }

    #[test]
    fn test_handle_rejects_unknown_format() {
        let mut artifact = linear_artifact();
        artifact.path = "model.pkl".to_string();
        assert!(ModelHandle::from_artifact(&artifact).is_err());
    }

    #[test]
    fn test_checksum_consistency() {
        let data = b"test model weights";
        assert_eq!(compute_checksum(data), compute_checksum(data));
    }
}

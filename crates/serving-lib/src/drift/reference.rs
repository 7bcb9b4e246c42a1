//! Reference distribution for drift comparisons

use super::stat_tests::{sorted, std_dev};
use super::DriftError;
use crate::models::{FeatureRecord, RawRecord, FEATURE_COLUMNS, FEATURE_COUNT};
use crate::predictor::FeatureEngineer;
use std::path::Path;
use tracing::info;

/// Immutable baseline dataset, pre-sorted per column.
///
/// Built once at startup and shared behind an `Arc` by every evaluation.
#[derive(Debug, Clone)]
pub struct ReferenceDistribution {
    rows: usize,
    sorted_columns: Vec<Vec<f64>>,
    std_devs: [f64; FEATURE_COUNT],
}

impl ReferenceDistribution {
    pub fn from_records(records: &[FeatureRecord]) -> Result<Self, DriftError> {
        if records.is_empty() {
            return Err(DriftError::EmptyReference);
        }
        if let Some((row, column)) = records
            .iter()
            .enumerate()
            .find_map(|(row, r)| r.first_non_finite().map(|c| (row, c)))
        {
            return Err(DriftError::NonFiniteReference {
                column: FEATURE_COLUMNS[column],
                row,
            });
        }

        let mut sorted_columns = Vec::with_capacity(FEATURE_COUNT);
        let mut std_devs = [0.0; FEATURE_COUNT];
        for (index, std) in std_devs.iter_mut().enumerate() {
            let column: Vec<f64> = records.iter().map(|r| r.to_array()[index]).collect();
            *std = std_dev(&column);
            sorted_columns.push(sorted(&column));
        }

        Ok(Self {
            rows: records.len(),
            sorted_columns,
            std_devs,
        })
    }

    /// Load a JSON array of feature rows, or of raw records which are run
    /// through `engineer` first.
    pub fn load(path: impl AsRef<Path>, engineer: &FeatureEngineer) -> Result<Self, DriftError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| DriftError::Io {
            path: shown.clone(),
            source,
        })?;

        let records = match serde_json::from_slice::<Vec<FeatureRecord>>(&bytes) {
            Ok(records) => records,
            Err(_) => {
                let raw: Vec<RawRecord> =
                    serde_json::from_slice(&bytes).map_err(|e| DriftError::Parse {
                        path: shown.clone(),
                        message: e.to_string(),
                    })?;
                engineer.transform(&raw)?.into_records()
            }
        };

        let reference = Self::from_records(&records)?;
        info!(path = %shown, rows = reference.rows(), "Loaded reference distribution");
        Ok(reference)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Ascending values of column `index`
    pub fn sorted_column(&self, index: usize) -> &[f64] {
        &self.sorted_columns[index]
    }

    /// Population standard deviation of column `index`
    pub fn std_dev(&self, index: usize) -> f64 {
        self.std_devs[index]
    }
}

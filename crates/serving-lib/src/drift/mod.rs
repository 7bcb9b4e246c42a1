//! Data drift detection
//!
//! This module provides:
//! - Two-sample distribution tests (Kolmogorov-Smirnov, normalized Wasserstein)
//! - The immutable reference distribution loaded at startup
//! - A drift monitor comparing each served batch against the reference

mod monitor;
mod reference;

pub use monitor::DriftMonitor;
pub use reference::ReferenceDistribution;
pub use stat_tests::{
    ks_p_value, ks_statistic, quantile, std_dev, wasserstein_distance, KS_THRESHOLD,
    KS_MAX_REFERENCE_ROWS, WASSERSTEIN_THRESHOLD,
};

use crate::predictor::FeatureError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Per-column two-sample test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatTest {
    /// KS for small references, Wasserstein otherwise
    #[default]
    Auto,
    Ks,
    Wasserstein,
}

impl fmt::Display for StatTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatTest::Auto => write!(f, "auto"),
            StatTest::Ks => write!(f, "ks"),
            StatTest::Wasserstein => write!(f, "wasserstein"),
        }
    }
}

/// Outcome of the test on one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDrift {
    pub column: &'static str,
    /// Test actually applied, never `Auto`
    pub test: StatTest,
    /// p-value for KS, normalized distance for Wasserstein
    pub statistic: f64,
    pub threshold: f64,
    pub drifted: bool,
}

/// Drift summary for one monitored batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub drifted_column_count: i64,
    /// Median of `relative_velocity` in the current batch
    pub reference_quantile_value: f64,
    pub drift_share: f64,
    pub columns: Vec<ColumnDrift>,
}

#[derive(Debug, Error)]
pub enum DriftError {
    #[error("cannot evaluate drift on an empty batch")]
    EmptyBatch,

    #[error("reference dataset is empty")]
    EmptyReference,

    #[error("reference dataset has a non-finite value in column {column} at row {row}")]
    NonFiniteReference { column: &'static str, row: usize },

    #[error("failed to read reference dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse reference dataset {path}: {message}")]
    Parse { path: String, message: String },

    #[error("failed to derive reference features: {0}")]
    Features(#[from] FeatureError),
}

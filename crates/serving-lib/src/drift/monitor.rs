//! Per-batch drift evaluation against the reference distribution

use super::stat_tests::{
    ks_p_value, ks_statistic, normalized_wasserstein, quantile, sorted, KS_MAX_REFERENCE_ROWS,
    KS_THRESHOLD, WASSERSTEIN_THRESHOLD,
};
use super::{ColumnDrift, DriftError, DriftReport, ReferenceDistribution, StatTest};
use crate::models::{FeatureRecord, FEATURE_COLUMNS, FEATURE_COUNT, RELATIVE_VELOCITY};
use std::sync::Arc;

/// Compares batches against a fixed reference. Holds no mutable state, so
/// concurrent evaluations need no locking.
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    reference: Arc<ReferenceDistribution>,
    test: StatTest,
}

impl DriftMonitor {
    pub fn new(reference: Arc<ReferenceDistribution>, test: StatTest) -> Self {
        Self { reference, test }
    }

    /// Test applied to every column, with `Auto` resolved by reference size
    pub fn effective_test(&self) -> StatTest {
        match self.test {
            StatTest::Auto if self.reference.rows() <= KS_MAX_REFERENCE_ROWS => StatTest::Ks,
            StatTest::Auto => StatTest::Wasserstein,
            explicit => explicit,
        }
    }

    pub fn evaluate(&self, current: &[FeatureRecord]) -> Result<DriftReport, DriftError> {
        if current.is_empty() {
            return Err(DriftError::EmptyBatch);
        }

        let test = self.effective_test();
        let mut columns = Vec::with_capacity(FEATURE_COUNT);
        let mut quantile_value = 0.0;

        for (index, &name) in FEATURE_COLUMNS.iter().enumerate() {
            let values: Vec<f64> = current.iter().map(|r| r.to_array()[index]).collect();
            let values = sorted(&values);
            let reference = self.reference.sorted_column(index);

            let (statistic, threshold, drifted) = match test {
                StatTest::Wasserstein => {
                    let distance =
                        normalized_wasserstein(reference, &values, self.reference.std_dev(index));
                    (distance, WASSERSTEIN_THRESHOLD, distance >= WASSERSTEIN_THRESHOLD)
                }
                _ => {
                    let d = ks_statistic(reference, &values);
                    let p = ks_p_value(d, reference.len(), values.len());
                    (p, KS_THRESHOLD, p < KS_THRESHOLD)
                }
            };

            if index == RELATIVE_VELOCITY {
                quantile_value = quantile(&values, 0.5).unwrap_or_default();
            }

            columns.push(ColumnDrift {
                column: name,
                test,
                statistic,
                threshold,
                drifted,
            });
        }

        let drifted = columns.iter().filter(|c| c.drifted).count();
        Ok(DriftReport {
            drifted_column_count: drifted as i64,
            reference_quantile_value: quantile_value,
            drift_share: drifted as f64 / FEATURE_COUNT as f64,
            columns,
        })
    }
}

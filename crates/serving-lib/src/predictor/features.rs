//! Feature derivation for model inference
//!
//! Turns a raw record batch into model-ready feature rows: rows with missing
//! values are dropped, identifying columns are removed and five derived
//! columns are computed. Velocity scaling is relative to the current batch.

use crate::models::{FeatureRecord, RawRecord, FEATURE_COLUMNS};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Value written in place of an undefined derived value under
/// [`DegeneracyPolicy::Substitute`]
pub const DEGENERACY_SENTINEL: f64 = 0.0;

/// How undefined derived values (zero denominators) are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegeneracyPolicy {
    /// Write [`DEGENERACY_SENTINEL`] and flag the batch
    #[default]
    Substitute,
    /// Fail the whole batch
    Reject,
}

/// Kind of numeric degeneracy met while deriving a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneracyKind {
    /// Every row has the same value, so min-max scaling divides by zero
    ConstantColumn,
    /// A ratio's denominator is zero
    ZeroDenominator,
}

/// One flagged degeneracy. `row` indexes the derived batch and is `None`
/// for batch-wide conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degeneracy {
    pub column: &'static str,
    pub row: Option<usize>,
    pub kind: DegeneracyKind,
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DegeneracyKind::ConstantColumn => "constant input, scaling range is zero",
            DegeneracyKind::ZeroDenominator => "zero denominator",
        };
        match self.row {
            Some(row) => write!(f, "{} at row {}: {}", self.column, row, kind),
            None => write!(f, "{}: {}", self.column, kind),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FeatureError {
    #[error("degenerate feature value in {0}")]
    Degenerate(Degeneracy),

    #[error("non-finite value in column {column} at row {row}")]
    NonFinite { column: &'static str, row: usize },
}

/// Output of [`FeatureEngineer::transform`]
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    records: Vec<FeatureRecord>,
    degeneracies: Vec<Degeneracy>,
    dropped_rows: usize,
}

impl FeatureBatch {
    /// Wrap already-derived rows (e.g. a stored reference dataset)
    pub fn from_records(records: Vec<FeatureRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FeatureRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Degeneracies substituted while deriving this batch
    pub fn degeneracies(&self) -> &[Degeneracy] {
        &self.degeneracies
    }

    /// Input rows removed because of missing values
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    /// Values of one column, by index into [`FEATURE_COLUMNS`]
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.records.iter().map(|r| r.to_array()[index]).collect()
    }
}

/// Raw row with every required value present
struct CompleteRow {
    absolute_magnitude: f64,
    diameter_min: f64,
    diameter_max: f64,
    relative_velocity: f64,
    miss_distance: f64,
}

/// Non-feature columns carried by at least one row of the batch, null or not
struct PresentColumns {
    neo_id: bool,
    name: bool,
    orbiting_body: bool,
    label: bool,
}

impl PresentColumns {
    fn of(batch: &[RawRecord]) -> Self {
        Self {
            neo_id: batch.iter().any(|r| r.neo_id.is_some()),
            name: batch.iter().any(|r| r.name.is_some()),
            orbiting_body: batch.iter().any(|r| r.orbiting_body.is_some()),
            label: batch.iter().any(|r| r.is_hazardous.is_some()),
        }
    }
}

impl CompleteRow {
    fn from_raw(record: &RawRecord, present: &PresentColumns) -> Option<Self> {
        if (present.neo_id && missing(&record.neo_id))
            || (present.name && missing(&record.name))
            || (present.orbiting_body && missing(&record.orbiting_body))
            || (present.label && missing(&record.is_hazardous))
        {
            return None;
        }
        Some(Self {
            absolute_magnitude: record.absolute_magnitude?,
            diameter_min: record.estimated_diameter_min?,
            diameter_max: record.estimated_diameter_max?,
            relative_velocity: record.relative_velocity?,
            miss_distance: record.miss_distance?,
        })
    }
}

fn missing<T>(value: &Option<Option<T>>) -> bool {
    !matches!(value, Some(Some(_)))
}

/// Derives model features from raw record batches
#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer {
    policy: DegeneracyPolicy,
}

impl FeatureEngineer {
    pub fn new(policy: DegeneracyPolicy) -> Self {
        Self { policy }
    }

    /// Derive the feature batch. Meant to run exactly once per raw batch.
    pub fn transform(&self, batch: &[RawRecord]) -> Result<FeatureBatch, FeatureError> {
        // Unused columns only count once some row carries them
        let present = PresentColumns::of(batch);
        let rows: Vec<CompleteRow> = batch
            .iter()
            .filter_map(|r| CompleteRow::from_raw(r, &present))
            .collect();

        let dropped_rows = batch.len() - rows.len();
        if dropped_rows > 0 {
            debug!(
                dropped = dropped_rows,
                total = batch.len(),
                "Dropped rows with missing values"
            );
        }

        let mut degeneracies = Vec::new();
        let (v_min, v_max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
            (lo.min(r.relative_velocity), hi.max(r.relative_velocity))
        });
        let v_range = v_max - v_min;
        let constant_velocity = !rows.is_empty() && v_range == 0.0;
        if constant_velocity {
            self.flag(
                Degeneracy {
                    column: "scaled_relative_velocity",
                    row: None,
                    kind: DegeneracyKind::ConstantColumn,
                },
                &mut degeneracies,
            )?;
        }

        let mut records = Vec::with_capacity(rows.len());
        for (row, r) in rows.iter().enumerate() {
            let average_diameter = (r.diameter_min + r.diameter_max) / 2.0;
            let scaled_relative_velocity = if constant_velocity {
                DEGENERACY_SENTINEL
            } else {
                (r.relative_velocity - v_min) / v_range
            };
            let velocity_distance_ratio = self.ratio(
                r.relative_velocity,
                r.miss_distance,
                "velocity_distance_ratio",
                row,
                &mut degeneracies,
            )?;
            let diameter_magnitude_ratio = self.ratio(
                average_diameter,
                r.absolute_magnitude,
                "diameter_magnitude_ratio",
                row,
                &mut degeneracies,
            )?;

            let record = FeatureRecord {
                absolute_magnitude: r.absolute_magnitude,
                estimated_diameter_min: r.diameter_min,
                estimated_diameter_max: r.diameter_max,
                relative_velocity: r.relative_velocity,
                miss_distance: r.miss_distance,
                average_diameter,
                scaled_relative_velocity,
                momentum: r.relative_velocity * average_diameter,
                velocity_distance_ratio,
                diameter_magnitude_ratio,
            };
            if let Some(column) = record.first_non_finite() {
                return Err(FeatureError::NonFinite {
                    column: FEATURE_COLUMNS[column],
                    row,
                });
            }
            records.push(record);
        }

        if !degeneracies.is_empty() {
            warn!(
                count = degeneracies.len(),
                first = %degeneracies[0],
                sentinel = DEGENERACY_SENTINEL,
                "Substituted degenerate feature values"
            );
        }

        Ok(FeatureBatch {
            records,
            degeneracies,
            dropped_rows,
        })
    }

    fn ratio(
        &self,
        numerator: f64,
        denominator: f64,
        column: &'static str,
        row: usize,
        degeneracies: &mut Vec<Degeneracy>,
    ) -> Result<f64, FeatureError> {
        if denominator != 0.0 {
            return Ok(numerator / denominator);
        }
        self.flag(
            Degeneracy {
                column,
                row: Some(row),
                kind: DegeneracyKind::ZeroDenominator,
            },
            degeneracies,
        )?;
        Ok(DEGENERACY_SENTINEL)
    }

    fn flag(
        &self,
        degeneracy: Degeneracy,
        degeneracies: &mut Vec<Degeneracy>,
    ) -> Result<(), FeatureError> {
        match self.policy {
            DegeneracyPolicy::Reject => Err(FeatureError::Degenerate(degeneracy)),
            DegeneracyPolicy::Substitute => {
                degeneracies.push(degeneracy);
                Ok(())
            }
        }
    }
}

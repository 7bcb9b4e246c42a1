//! Core data models for the serving pipeline

use serde::{Deserialize, Deserializer, Serialize};

/// Number of model-ready feature columns
pub const FEATURE_COUNT: usize = 10;

/// Feature column names, in the column order the model is trained on
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "absolute_magnitude",
    "estimated_diameter_min",
    "estimated_diameter_max",
    "relative_velocity",
    "miss_distance",
    "average_diameter",
    "scaled_relative_velocity",
    "momentum",
    "velocity_distance_ratio",
    "diameter_magnitude_ratio",
];

/// Position of `relative_velocity` in [`FEATURE_COLUMNS`]
pub const RELATIVE_VELOCITY: usize = 3;

/// Catalogue identifier of a near-earth object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NeoId {
    Number(i64),
    Text(String),
}

/// One observed object as received from a client or the reference dataset.
///
/// Every field is optional at this layer. The identifying columns and the
/// label keep an absent key (`None`) apart from an explicit `null`
/// (`Some(None)`), since only columns the batch carries take part in
/// row completeness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub neo_id: Option<Option<NeoId>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub name: Option<Option<String>>,
    pub absolute_magnitude: Option<f64>,
    pub estimated_diameter_min: Option<f64>,
    pub estimated_diameter_max: Option<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub orbiting_body: Option<Option<String>>,
    pub relative_velocity: Option<f64>,
    pub miss_distance: Option<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub is_hazardous: Option<Option<bool>>,
}

/// Marks a key as present, whatever its value
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Model-ready feature row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub absolute_magnitude: f64,
    pub estimated_diameter_min: f64,
    pub estimated_diameter_max: f64,
    pub relative_velocity: f64,
    pub miss_distance: f64,
    pub average_diameter: f64,
    pub scaled_relative_velocity: f64,
    pub momentum: f64,
    pub velocity_distance_ratio: f64,
    pub diameter_magnitude_ratio: f64,
}

impl FeatureRecord {
    /// Values in [`FEATURE_COLUMNS`] order
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.absolute_magnitude,
            self.estimated_diameter_min,
            self.estimated_diameter_max,
            self.relative_velocity,
            self.miss_distance,
            self.average_diameter,
            self.scaled_relative_velocity,
            self.momentum,
            self.velocity_distance_ratio,
            self.diameter_magnitude_ratio,
        ]
    }

    /// Index of the first non-finite value, if any
    pub fn first_non_finite(&self) -> Option<usize> {
        self.to_array().iter().position(|v| !v.is_finite())
    }
}

/// Persisted drift summary, one per monitored batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub drifted_column_count: i64,
    pub reference_quantile_value: f64,
}

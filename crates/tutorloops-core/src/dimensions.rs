//! Versioned, weighted rubric and the overall score derived from it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::DimensionError;

/// Tolerance for the weight sum check
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Factor that maps a weighted 1–5 rubric mean onto 0–100
pub const OVERALL_SCALE: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimension {
    pub name: String,
    pub weight: f64,
}

/// Named, weighted dimensions on a fixed bounded scale.
///
/// Weights are validated at construction; a table that exists always sums
/// to 1.0 within [`WEIGHT_TOLERANCE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionTable {
    version: String,
    scale_min: f64,
    scale_max: f64,
    dimensions: Vec<Dimension>,
}

impl DimensionTable {
    pub fn new(
        version: impl Into<String>,
        scale_min: f64,
        scale_max: f64,
        dimensions: Vec<Dimension>,
    ) -> Result<Self, DimensionError> {
        if !(scale_min.is_finite() && scale_max.is_finite()) || scale_min >= scale_max {
            return Err(DimensionError::InvalidScale {
                min: scale_min,
                max: scale_max,
            });
        }
        if dimensions.is_empty() {
            return Err(DimensionError::EmptyRubric);
        }

        let mut seen = BTreeSet::new();
        for dimension in &dimensions {
            if !seen.insert(dimension.name.as_str()) {
                return Err(DimensionError::DuplicateDimension(dimension.name.clone()));
            }
            if !dimension.weight.is_finite() || dimension.weight < 0.0 {
                return Err(DimensionError::InvalidWeight {
                    name: dimension.name.clone(),
                    weight: dimension.weight,
                });
            }
        }

        let sum: f64 = dimensions.iter().map(|d| d.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(DimensionError::WeightSum(sum));
        }

        Ok(Self {
            version: version.into(),
            scale_min,
            scale_max,
            dimensions,
        })
    }

    /// A 1–5 table from `(name, weight)` pairs.
    pub fn from_weights<S: Into<String>>(
        version: impl Into<String>,
        weights: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self, DimensionError> {
        let dimensions = weights
            .into_iter()
            .map(|(name, weight)| Dimension {
                name: name.into(),
                weight,
            })
            .collect();
        Self::new(version, 1.0, 5.0, dimensions)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scale(&self) -> (f64, f64) {
        (self.scale_min, self.scale_max)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    /// Map a judge's raw scores onto this table. Every dimension must be
    /// present and in range; names the table does not know are ignored.
    pub fn score(&self, raw: &BTreeMap<String, f64>) -> Result<DimensionScores, DimensionError> {
        let mut scores = BTreeMap::new();
        for dimension in &self.dimensions {
            let value = *raw
                .get(&dimension.name)
                .ok_or_else(|| DimensionError::MissingDimension(dimension.name.clone()))?;
            if !value.is_finite() || value < self.scale_min || value > self.scale_max {
                return Err(DimensionError::OutOfRange {
                    dimension: dimension.name.clone(),
                    value,
                    min: self.scale_min,
                    max: self.scale_max,
                });
            }
            scores.insert(
                dimension.name.clone(),
                DimensionScore {
                    value,
                    weight: dimension.weight,
                },
            );
        }
        Ok(DimensionScores {
            version: self.version.clone(),
            scores,
        })
    }
}

impl<'de> Deserialize<'de> for DimensionTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Raw {
            #[serde(default = "default_version")]
            version: String,
            #[serde(default = "default_min")]
            scale_min: f64,
            #[serde(default = "default_max")]
            scale_max: f64,
            dimensions: Vec<Dimension>,
        }

        let raw = Raw::deserialize(deserializer)?;
        DimensionTable::new(raw.version, raw.scale_min, raw.scale_max, raw.dimensions)
            .map_err(serde::de::Error::custom)
    }
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_min() -> f64 {
    1.0
}

fn default_max() -> f64 {
    5.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub value: f64,
    pub weight: f64,
}

/// Judged values with the weights they were scored under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub version: String,
    pub scores: BTreeMap<String, DimensionScore>,
}

impl DimensionScores {
    /// Derived on every call, never stored.
    pub fn overall_score(&self) -> f64 {
        overall_score(self.scores.values().map(|s| (s.value, s.weight)))
    }

    pub fn value(&self, dimension: &str) -> Option<f64> {
        self.scores.get(dimension).map(|s| s.value)
    }
}

/// `20 × Σ(value × weight)`, clamped to [0, 100]. Non-finite input yields 0.
pub fn overall_score(pairs: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let weighted: f64 = pairs.into_iter().map(|(value, weight)| value * weight).sum();
    let scaled = OVERALL_SCALE * weighted;
    if scaled.is_finite() {
        scaled.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

use serde::{Deserialize, Serialize};

use crate::descriptive::{mean, sum_squares};
use crate::estimate::Estimate;

/// Conventional magnitude bands for |d|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectMagnitude {
    pub fn of(d: f64) -> Self {
        let d = d.abs();
        if d < 0.2 {
            EffectMagnitude::Negligible
        } else if d < 0.5 {
            EffectMagnitude::Small
        } else if d < 0.8 {
            EffectMagnitude::Medium
        } else {
            EffectMagnitude::Large
        }
    }
}

impl std::fmt::Display for EffectMagnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EffectMagnitude::Negligible => write!(f, "negligible"),
            EffectMagnitude::Small => write!(f, "small"),
            EffectMagnitude::Medium => write!(f, "medium"),
            EffectMagnitude::Large => write!(f, "large"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSize {
    pub d: f64,
    pub magnitude: EffectMagnitude,
    pub mean_difference: f64,
    pub pooled_sd: f64,
}

/// Cohen's d of `first` over `second`.
///
/// The pooled SD weights each group's variance by its degrees of freedom.
/// Groups with fewer than two observations, or with no spread at all,
/// leave d undefined.
pub fn cohens_d(first: &[f64], second: &[f64]) -> Estimate<EffectSize> {
    let (n1, n2) = (first.len(), second.len());
    if n1 < 2 || n2 < 2 {
        return Estimate::undefined(format!("needs N >= 2 per group (got {} and {})", n1, n2));
    }

    let pooled_var = (sum_squares(first) + sum_squares(second)) / (n1 + n2 - 2) as f64;
    let pooled_sd = pooled_var.sqrt();
    if pooled_sd <= 0.0 || !pooled_sd.is_finite() {
        return Estimate::undefined("pooled standard deviation is zero");
    }

    let mean_difference = mean(first) - mean(second);
    let d = mean_difference / pooled_sd;
    Estimate::Computed(EffectSize {
        d,
        magnitude: EffectMagnitude::of(d),
        mean_difference,
        pooled_sd,
    })
}

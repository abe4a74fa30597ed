use serde::{Deserialize, Serialize};

use crate::estimate::Estimate;

/// Gain from one level to the next in a factor's declared order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelGain {
    pub from: String,
    pub to: String,
    pub gain: f64,
    /// Percentage of the base-to-last gain; absent when that gain is zero
    pub share: Option<f64>,
}

/// How an ordered factor's total effect splits across its steps, e.g.
/// base → enhanced (prompt engineering) → full (unique to the last level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub factor: String,
    pub baseline: String,
    pub total_gain: f64,
    pub steps: Vec<LevelGain>,
}

/// `level_means` must be in the factor's declared order.
pub fn decompose(factor: &str, level_means: &[(String, Option<f64>)]) -> Estimate<Decomposition> {
    if level_means.len() < 2 {
        return Estimate::insufficient(format!("factor {} needs at least two levels", factor));
    }
    if let Some((level, _)) = level_means.iter().find(|(_, m)| m.is_none()) {
        return Estimate::insufficient(format!("no completed cells at {}={}", factor, level));
    }
    let means: Vec<(&str, f64)> = level_means
        .iter()
        .filter_map(|(level, m)| m.map(|m| (level.as_str(), m)))
        .collect();

    let (baseline, first) = means[0];
    let total_gain = means[means.len() - 1].1 - first;
    let steps = means
        .windows(2)
        .map(|pair| {
            let gain = pair[1].1 - pair[0].1;
            LevelGain {
                from: pair[0].0.to_string(),
                to: pair[1].0.to_string(),
                gain,
                share: (total_gain != 0.0).then(|| 100.0 * gain / total_gain),
            }
        })
        .collect();

    Estimate::Computed(Decomposition {
        factor: factor.to_string(),
        baseline: baseline.to_string(),
        total_gain,
        steps,
    })
}

/// Effect of `factor` (second level over first) at one level of the other factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleEffect {
    pub at: String,
    pub effect: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionContrast {
    pub factor: String,
    pub across: String,
    pub simple_effects: [SimpleEffect; 2],
    /// Simple effect at the second level minus the one at the first
    pub contrast: f64,
}

/// Cell means of a 2×2 sub-design, indexed `[factor level][across level]`.
pub fn interaction_contrast(
    factor: (&str, [&str; 2]),
    across: (&str, [&str; 2]),
    means: [[Option<f64>; 2]; 2],
) -> Estimate<InteractionContrast> {
    let mut effects = Vec::with_capacity(2);
    for (b, level) in across.1.iter().enumerate() {
        match (means[0][b], means[1][b]) {
            (Some(low), Some(high)) => effects.push(SimpleEffect {
                at: level.to_string(),
                effect: high - low,
            }),
            _ => {
                return Estimate::insufficient(format!(
                    "missing cells for {} at {}={}",
                    factor.0, across.0, level
                ))
            }
        }
    }

    let contrast = effects[1].effect - effects[0].effect;
    let [first, second]: [SimpleEffect; 2] = match effects.try_into() {
        Ok(pair) => pair,
        Err(_) => return Estimate::insufficient("expected two simple effects"),
    };
    Estimate::Computed(InteractionContrast {
        factor: factor.0.to_string(),
        across: across.0.to_string(),
        simple_effects: [first, second],
        contrast,
    })
}

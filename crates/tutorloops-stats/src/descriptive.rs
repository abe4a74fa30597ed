use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::estimate::Estimate;

pub const CONFIDENCE_LEVEL: f64 = 0.95;

/// Count, centre and spread of one group of scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptive {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation; absent for a single observation
    pub sd: Option<f64>,
    /// 95% interval for the mean from the t-distribution with n-1 df
    pub ci: Option<(f64, f64)>,
    pub min: f64,
    pub max: f64,
}

impl Descriptive {
    pub fn of(values: &[f64]) -> Estimate<Descriptive> {
        if values.is_empty() {
            return Estimate::NoData;
        }

        let n = values.len();
        let mean = mean(values);
        let sd = sample_sd(values);
        let ci = sd.and_then(|sd| {
            let half = t_critical(n - 1)? * sd / (n as f64).sqrt();
            Some((mean - half, mean + half))
        });
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Estimate::Computed(Descriptive {
            n,
            mean,
            sd,
            ci,
            min,
            max,
        })
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sum of squared deviations from the mean
pub(crate) fn sum_squares(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum()
}

pub(crate) fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(sum_squares(values) / (values.len() - 1) as f64)
}

pub(crate) fn sample_sd(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Two-sided critical value of Student's t at [`CONFIDENCE_LEVEL`].
pub(crate) fn t_critical(df: usize) -> Option<f64> {
    if df == 0 {
        return None;
    }
    let p = 1.0 - (1.0 - CONFIDENCE_LEVEL) / 2.0;
    match StudentsT::new(0.0, 1.0, df as f64) {
        Ok(t) => Some(t.inverse_cdf(p)),
        Err(_) => None,
    }
}

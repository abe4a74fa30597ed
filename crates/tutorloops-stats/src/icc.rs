use serde::{Deserialize, Serialize};

use crate::descriptive::{mean, sample_sd};
use crate::estimate::Estimate;

/// A rater whose spread is this small relative to the widest rater is flagged
const RELATIVE_VARIANCE_FLOOR: f64 = 0.1;
const ABSOLUTE_SD_FLOOR: f64 = 1e-6;

/// Raw per-judge summary reported next to the ICC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaterSummary {
    pub judge: String,
    pub mean: f64,
    pub sd: Option<f64>,
    /// Near-constant ratings, e.g. a judge that scores everything the same
    pub near_zero_variance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reliability {
    pub items: usize,
    pub icc: Estimate<f64>,
    pub raters: Vec<RaterSummary>,
}

/// ICC(2,1): two-way random effects, absolute agreement, single rater.
///
/// `ratings[i][j]` is judge `j`'s score for item `i`; every row must hold one
/// score per judge.
pub fn icc_2_1(judges: &[String], ratings: &[Vec<f64>]) -> Estimate<Reliability> {
    if ratings.is_empty() {
        return Estimate::NoData;
    }
    let n = ratings.len();
    let k = judges.len();
    if k < 2 {
        return Estimate::insufficient("needs at least two judges");
    }
    if ratings.iter().any(|row| row.len() != k) {
        return Estimate::insufficient("every item needs a score from every judge");
    }

    let columns: Vec<Vec<f64>> = (0..k)
        .map(|j| ratings.iter().map(|row| row[j]).collect())
        .collect();
    let raters = summarize_raters(judges, &columns);

    if n < 2 {
        return Estimate::Computed(Reliability {
            items: n,
            icc: Estimate::undefined("needs at least two items"),
            raters,
        });
    }

    let all: Vec<f64> = ratings.iter().flatten().copied().collect();
    let grand = mean(&all);
    let (nf, kf) = (n as f64, k as f64);

    let ss_rows: f64 = kf * ratings.iter().map(|row| (mean(row) - grand).powi(2)).sum::<f64>();
    let ss_cols: f64 = nf * columns.iter().map(|c| (mean(c) - grand).powi(2)).sum::<f64>();
    let ss_total: f64 = all.iter().map(|x| (x - grand).powi(2)).sum();
    let ss_error = (ss_total - ss_rows - ss_cols).max(0.0);

    let ms_rows = ss_rows / (nf - 1.0);
    let ms_cols = ss_cols / (kf - 1.0);
    let ms_error = ss_error / ((nf - 1.0) * (kf - 1.0));

    let denominator = ms_rows + (kf - 1.0) * ms_error + kf * (ms_cols - ms_error) / nf;
    let icc = if denominator > 0.0 {
        Estimate::Computed((ms_rows - ms_error) / denominator)
    } else {
        Estimate::undefined("ratings have no variance")
    };

    Estimate::Computed(Reliability {
        items: n,
        icc,
        raters,
    })
}

fn summarize_raters(judges: &[String], columns: &[Vec<f64>]) -> Vec<RaterSummary> {
    let sds: Vec<Option<f64>> = columns.iter().map(|c| sample_sd(c)).collect();
    let widest = sds.iter().flatten().copied().fold(0.0, f64::max);

    judges
        .iter()
        .zip(columns)
        .zip(&sds)
        .map(|((judge, column), sd)| RaterSummary {
            judge: judge.clone(),
            mean: mean(column),
            sd: *sd,
            near_zero_variance: sd.is_some_and(|sd| {
                sd < ABSOLUTE_SD_FLOOR || sd < RELATIVE_VARIANCE_FLOOR * widest
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judges(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("judge{}", i)).collect()
    }

    fn rows(columns: &[&[f64]]) -> Vec<Vec<f64>> {
        (0..columns[0].len())
            .map(|i| columns.iter().map(|c| c[i]).collect())
            .collect()
    }

    #[test]
    fn test_exact_agreement_is_one() {
        let scores = [62.0, 71.5, 80.0, 55.0, 90.0];
        let result = icc_2_1(&judges(2), &rows(&[&scores, &scores]));
        let result = result.computed().unwrap();
        assert_eq!(result.items, 5);
        assert!((result.icc.computed().unwrap() - 1.0).abs() < 1e-12);
        assert!(result.raters.iter().all(|r| !r.near_zero_variance));
    }

    #[test]
    fn test_uncorrelated_raters_are_near_zero() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 1.0, 3.0];
        let result = icc_2_1(&judges(2), &rows(&[&x, &y]));
        let icc = *result.computed().unwrap().icc.computed().unwrap();
        assert!(icc.abs() < 1e-9, "icc {}", icc);
    }

    #[test]
    fn test_constant_offset_lowers_absolute_agreement() {
        let x = [60.0, 70.0, 80.0, 90.0];
        let y = [70.0, 80.0, 90.0, 100.0];
        let result = icc_2_1(&judges(2), &rows(&[&x, &y]));
        let icc = *result.computed().unwrap().icc.computed().unwrap();
        assert!(icc > 0.5 && icc < 1.0, "icc {}", icc);
    }

    #[test]
    fn test_flat_rater_is_flagged() {
        let varied = [50.0, 65.0, 80.0, 95.0];
        let flat = [80.0, 80.0, 80.0, 80.0];
        let result = icc_2_1(&judges(2), &rows(&[&varied, &flat]));
        let result = result.computed().unwrap();
        assert!(!result.raters[0].near_zero_variance);
        assert!(result.raters[1].near_zero_variance);
        assert_eq!(result.raters[1].mean, 80.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(icc_2_1(&judges(2), &[]), Estimate::NoData);
        assert!(matches!(
            icc_2_1(&judges(1), &[vec![1.0], vec![2.0]]),
            Estimate::Insufficient { .. }
        ));

        let single = icc_2_1(&judges(2), &[vec![1.0, 2.0]]);
        assert!(matches!(
            single.computed().unwrap().icc,
            Estimate::Undefined { .. }
        ));
    }
}

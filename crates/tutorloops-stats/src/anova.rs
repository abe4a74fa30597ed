//! N-way analysis of variance over crossed factors.
//!
//! Factors are effect coded and fitted by least squares. Each term's sum of
//! squares is the increase in residual SS when that term alone is removed
//! from the full model (Type III), so unbalanced designs stay interpretable.
//! Terms whose level combinations were never observed are reported as
//! insufficient data and left out of the model.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use tracing::debug;

use crate::descriptive::sum_squares;
use crate::estimate::Estimate;

const PIVOT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnovaFactor {
    pub name: String,
    pub levels: Vec<String>,
}

impl AnovaFactor {
    pub fn new<S: Into<String>>(name: impl Into<String>, levels: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }
}

/// One score with the index of its level in each factor
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub levels: Vec<usize>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStats {
    pub ss: f64,
    pub df: usize,
    pub ms: f64,
    /// Absent when the residual has no degrees of freedom or no variance
    pub f: Option<f64>,
    pub p: Option<f64>,
    pub eta_squared: f64,
    pub partial_eta_squared: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaTerm {
    /// Factor names joined by `:`
    pub name: String,
    pub factors: Vec<String>,
    pub stats: Estimate<TermStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Residual {
    pub ss: f64,
    pub df: usize,
    pub ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaTable {
    pub n: usize,
    pub terms: Vec<AnovaTerm>,
    pub residual: Residual,
    pub total_ss: f64,
}

impl AnovaTable {
    pub fn term(&self, name: &str) -> Option<&AnovaTerm> {
        self.terms.iter().find(|t| t.name == name)
    }
}

struct Fit {
    sse: f64,
    rank: usize,
}

/// Fit every main effect and every interaction up to `max_order` factors.
pub fn anova(
    factors: &[AnovaFactor],
    observations: &[Observation],
    max_order: usize,
) -> Estimate<AnovaTable> {
    if observations.is_empty() {
        return Estimate::NoData;
    }
    if factors.is_empty() {
        return Estimate::insufficient("no factors to analyse");
    }
    if let Some(bad) = observations
        .iter()
        .find(|o| {
            o.levels.len() != factors.len()
                || o.levels.iter().zip(factors).any(|(l, f)| *l >= f.levels.len())
        })
    {
        return Estimate::insufficient(format!(
            "observation levels {:?} do not match the factors",
            bad.levels
        ));
    }

    let n = observations.len();
    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
    let total_ss = sum_squares(&values);
    if total_ss <= 0.0 {
        return Estimate::undefined("scores have no variance");
    }

    // Screen each term for empty level combinations before fitting
    let mut screened: Vec<(Vec<usize>, Option<String>)> = Vec::new();
    for term in terms_up_to(factors.len(), max_order.max(1)) {
        let problem = screen_term(&term, factors, observations);
        screened.push((term, problem));
    }

    let kept: Vec<&Vec<usize>> = screened
        .iter()
        .filter(|(_, problem)| problem.is_none())
        .map(|(term, _)| term)
        .collect();
    let term_columns: Vec<Vec<Vec<f64>>> = kept
        .iter()
        .map(|term| columns_for(term, factors, observations))
        .collect();

    let full = fit(&model(n, term_columns.iter()), &values);
    let residual_df = n.saturating_sub(full.rank);
    let residual_ms = (residual_df > 0).then(|| full.sse / residual_df as f64);
    debug!(n, rank = full.rank, residual_df, "fitted anova model");

    let mut kept_index = 0;
    let mut terms = Vec::new();
    for (term, problem) in &screened {
        let names: Vec<String> = term.iter().map(|&f| factors[f].name.clone()).collect();
        let name = names.join(":");
        let stats = match problem {
            Some(reason) => Estimate::insufficient(reason.clone()),
            None => {
                let index = kept_index;
                kept_index += 1;
                let reduced = fit(
                    &model(
                        n,
                        term_columns
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != index)
                            .map(|(_, c)| c),
                    ),
                    &values,
                );
                term_stats(&full, &reduced, residual_df, residual_ms, total_ss)
            }
        };
        terms.push(AnovaTerm {
            name,
            factors: names,
            stats,
        });
    }

    Estimate::Computed(AnovaTable {
        n,
        terms,
        residual: Residual {
            ss: full.sse,
            df: residual_df,
            ms: residual_ms,
        },
        total_ss,
    })
}

fn term_stats(
    full: &Fit,
    reduced: &Fit,
    residual_df: usize,
    residual_ms: Option<f64>,
    total_ss: f64,
) -> Estimate<TermStats> {
    let df = full.rank.saturating_sub(reduced.rank);
    if df == 0 {
        return Estimate::insufficient("term is not estimable from the observed cells");
    }
    let ss = (reduced.sse - full.sse).max(0.0);
    let ms = ss / df as f64;

    let (f, p) = match residual_ms {
        Some(mse) if mse > f64::EPSILON * total_ss => {
            let f = ms / mse;
            let p = match FisherSnedecor::new(df as f64, residual_df as f64) {
                Ok(dist) => Some((1.0 - dist.cdf(f)).clamp(0.0, 1.0)),
                Err(_) => None,
            };
            (Some(f), p)
        }
        _ => (None, None),
    };

    let partial_denominator = ss + full.sse;
    Estimate::Computed(TermStats {
        ss,
        df,
        ms,
        f,
        p,
        eta_squared: ss / total_ss,
        partial_eta_squared: if partial_denominator > 0.0 {
            ss / partial_denominator
        } else {
            0.0
        },
    })
}

/// All factor subsets of size 1..=max_order, main effects first.
fn terms_up_to(factor_count: usize, max_order: usize) -> Vec<Vec<usize>> {
    let mut terms = Vec::new();
    for order in 1..=max_order.min(factor_count) {
        combinations(factor_count, order, 0, &mut Vec::new(), &mut terms);
    }
    terms
}

fn combinations(n: usize, k: usize, start: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    if current.len() == k {
        out.push(current.clone());
        return;
    }
    for i in start..n {
        current.push(i);
        combinations(n, k, i + 1, current, out);
        current.pop();
    }
}

/// Returns why the term cannot be estimated, if it cannot.
fn screen_term(term: &[usize], factors: &[AnovaFactor], observations: &[Observation]) -> Option<String> {
    if let Some(&f) = term.iter().find(|&&f| factors[f].levels.len() < 2) {
        return Some(format!("factor {} has a single level", factors[f].name));
    }

    let mut combination = vec![0usize; term.len()];
    loop {
        let observed = observations
            .iter()
            .any(|o| term.iter().zip(&combination).all(|(&f, &l)| o.levels[f] == l));
        if !observed {
            let cell: Vec<String> = term
                .iter()
                .zip(&combination)
                .map(|(&f, &l)| format!("{}={}", factors[f].name, factors[f].levels[l]))
                .collect();
            return Some(format!("no observations for {}", cell.join(", ")));
        }

        // Odometer over the term's level combinations
        let mut position = term.len();
        loop {
            if position == 0 {
                return None;
            }
            position -= 1;
            combination[position] += 1;
            if combination[position] < factors[term[position]].levels.len() {
                break;
            }
            combination[position] = 0;
        }
    }
}

fn effect_code(level: usize, column: usize, levels: usize) -> f64 {
    if level == column {
        1.0
    } else if level == levels - 1 {
        -1.0
    } else {
        0.0
    }
}

fn columns_for(term: &[usize], factors: &[AnovaFactor], observations: &[Observation]) -> Vec<Vec<f64>> {
    let mut columns = vec![vec![1.0; observations.len()]];
    for &f in term {
        let levels = factors[f].levels.len();
        let mut next = Vec::with_capacity(columns.len() * (levels - 1));
        for column in &columns {
            for j in 0..levels - 1 {
                next.push(
                    column
                        .iter()
                        .zip(observations)
                        .map(|(v, o)| v * effect_code(o.levels[f], j, levels))
                        .collect(),
                );
            }
        }
        columns = next;
    }
    columns
}

/// Intercept followed by the given terms' columns.
fn model<'a>(n: usize, terms: impl Iterator<Item = &'a Vec<Vec<f64>>>) -> Vec<Vec<f64>> {
    let mut columns = vec![vec![1.0; n]];
    for term in terms {
        columns.extend(term.iter().cloned());
    }
    columns
}

/// Least squares through the normal equations.
///
/// Gaussian elimination with partial pivoting; columns that are linearly
/// dependent on earlier ones get a zero coefficient, which still yields a
/// least-squares solution and the model's rank.
fn fit(columns: &[Vec<f64>], y: &[f64]) -> Fit {
    let p = columns.len();
    let mut a: Vec<Vec<f64>> = (0..p)
        .map(|i| (0..p).map(|j| dot(&columns[i], &columns[j])).collect())
        .collect();
    let mut b: Vec<f64> = columns.iter().map(|c| dot(c, y)).collect();

    let scale = a
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(0.0, f64::max)
        .max(1.0);

    let mut pivots: Vec<(usize, usize)> = Vec::new();
    let mut row = 0;
    for col in 0..p {
        if row == p {
            break;
        }
        let best = (row..p).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()));
        let Some(best) = best else { break };
        if a[best][col].abs() <= PIVOT_TOLERANCE * scale {
            continue;
        }
        a.swap(row, best);
        b.swap(row, best);
        for r in row + 1..p {
            let factor = a[r][col] / a[row][col];
            if factor != 0.0 {
                for c in col..p {
                    a[r][c] -= factor * a[row][c];
                }
                b[r] -= factor * b[row];
            }
        }
        pivots.push((row, col));
        row += 1;
    }

    let mut beta = vec![0.0; p];
    for &(r, c) in pivots.iter().rev() {
        let tail: f64 = (c + 1..p).map(|k| a[r][k] * beta[k]).sum();
        beta[c] = (b[r] - tail) / a[r][c];
    }

    let sse = y
        .iter()
        .enumerate()
        .map(|(i, yi)| {
            let predicted: f64 = columns.iter().zip(&beta).map(|(col, bj)| col[i] * bj).sum();
            (yi - predicted).powi(2)
        })
        .sum();

    Fit {
        sse,
        rank: pivots.len(),
    }
}

fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

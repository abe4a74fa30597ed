use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use tutorloops_core::{
    Architecture, CellRecord, CellStatus, DimensionError, DimensionScores, DimensionTable, Factor,
    FailureKind, FailureStage, Outcome,
};
use tutorloops_critic::InterventionType;

use crate::anova::{anova, AnovaFactor, AnovaTable, Observation};
use crate::decomposition::{decompose, interaction_contrast, Decomposition, InteractionContrast};
use crate::descriptive::{mean, Descriptive};
use crate::effect::{cohens_d, EffectSize};
use crate::error::StatsError;
use crate::estimate::Estimate;
use crate::icc::{icc_2_1, Reliability};

pub const DEFAULT_INTERACTION_ORDER: usize = 2;

/// Reduces finished cells to descriptive and inferential statistics.
///
/// Only completed cells contribute scores, and their overall score is
/// recomputed from the dimension values under this engine's rubric. Failed
/// cells are still counted in the failure summary and, when they carry a
/// session, in the outcome distributions.
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    rubric: DimensionTable,
    factors: Option<Vec<AnovaFactor>>,
    max_interaction_order: usize,
}

impl StatisticsEngine {
    pub fn new(rubric: DimensionTable) -> Self {
        Self {
            rubric,
            factors: None,
            max_interaction_order: DEFAULT_INTERACTION_ORDER,
        }
    }

    /// Fails when the weights do not form a valid rubric.
    pub fn from_weights<S: Into<String>>(
        version: impl Into<String>,
        weights: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self, StatsError> {
        Ok(Self::new(DimensionTable::from_weights(version, weights)?))
    }

    /// Use the declared factor levels and their order instead of inferring
    /// them from the records.
    pub fn with_factors(mut self, factors: &[Factor]) -> Self {
        self.factors = Some(
            factors
                .iter()
                .map(|f| AnovaFactor::new(&f.name, &f.levels))
                .collect(),
        );
        self
    }

    pub fn with_max_interaction_order(mut self, order: usize) -> Result<Self, StatsError> {
        if order == 0 {
            return Err(StatsError::InteractionOrder);
        }
        self.max_interaction_order = order;
        Ok(self)
    }

    pub fn rubric(&self) -> &DimensionTable {
        &self.rubric
    }

    fn rescore(&self, scores: &DimensionScores) -> Result<DimensionScores, DimensionError> {
        let raw: BTreeMap<String, f64> = scores
            .scores
            .iter()
            .map(|(name, s)| (name.clone(), s.value))
            .collect();
        self.rubric.score(&raw)
    }

    pub fn report(&self, records: &[CellRecord]) -> StatisticsReport {
        let mut scored = Vec::new();
        let mut excluded = Vec::new();
        for record in records.iter().filter(|r| r.is_completed()) {
            let rescored = match &record.dimension_scores {
                Some(scores) => self.rescore(scores).map_err(|e| e.to_string()),
                None => Err("no dimension scores".to_string()),
            };
            match rescored {
                Ok(dimensions) => scored.push(Scored {
                    record,
                    overall: dimensions.overall_score(),
                    dimensions,
                }),
                Err(reason) => {
                    warn!(cell = %record.key(), %reason, "excluding cell from statistics");
                    excluded.push(Exclusion {
                        cell: record.key().to_string(),
                        reason,
                    });
                }
            }
        }

        let factors = self
            .factors
            .clone()
            .unwrap_or_else(|| infer_factors(records));
        debug!(
            factors = factors.len(),
            scored = scored.len(),
            "computing statistics"
        );

        let counts = CellCounts {
            total: records.len(),
            completed: records.iter().filter(|r| r.is_completed()).count(),
            failed: count_status(records, CellStatus::Failed),
            pending: count_status(records, CellStatus::Pending),
            analysed: scored.len(),
            excluded,
        };

        let overall_values: Vec<f64> = scored.iter().map(|s| s.overall).collect();
        let report = StatisticsReport {
            rubric_version: self.rubric.version().to_string(),
            counts,
            overall: Descriptive::of(&overall_values),
            by_profile: group_by(records, &scored, |r| Some(r.profile.clone())),
            by_scenario: group_by(records, &scored, |r| Some(r.scenario.clone())),
            by_architecture: group_by(records, &scored, |r| Some(r.architecture.to_string())),
            by_factor: factors
                .iter()
                .map(|f| factor_summary(f, &scored))
                .collect(),
            dimensions: self.dimension_summaries(records, &scored),
            effects: effect_comparisons(&factors, &scored),
            anova: anova(
                &factors,
                &observations(&factors, &scored),
                self.max_interaction_order,
            ),
            decompositions: factors
                .iter()
                .filter(|f| f.levels.len() >= 3)
                .map(|f| (f.name.clone(), decompose(&f.name, &level_means(f, &scored))))
                .collect(),
            interactions: interactions(&factors, &scored),
            reliability: self.reliability(&scored),
            outcomes: outcome_distributions(records),
            interventions: intervention_distributions(records),
            failures: failure_summary(records),
        };

        info!(
            analysed = report.counts.analysed,
            failed = report.counts.failed,
            excluded = report.counts.excluded.len(),
            "computed statistics report"
        );
        report
    }

    fn dimension_summaries(
        &self,
        records: &[CellRecord],
        scored: &[Scored<'_>],
    ) -> BTreeMap<String, DimensionSummary> {
        self.rubric
            .names()
            .map(|name| {
                let values: Vec<f64> = scored
                    .iter()
                    .filter_map(|s| s.dimensions.value(name))
                    .collect();
                let mut by_profile = BTreeMap::new();
                for profile in profiles(records) {
                    let values: Vec<f64> = scored
                        .iter()
                        .filter(|s| s.record.profile == profile)
                        .filter_map(|s| s.dimensions.value(name))
                        .collect();
                    by_profile.insert(profile, Descriptive::of(&values));
                }
                (
                    name.to_string(),
                    DimensionSummary {
                        overall: Descriptive::of(&values),
                        by_profile,
                    },
                )
            })
            .collect()
    }

    fn reliability(&self, scored: &[Scored<'_>]) -> Option<ReliabilityReport> {
        let mut judges: Vec<String> = Vec::new();
        for s in scored {
            for j in &s.record.judgements {
                if !judges.contains(&j.judge) {
                    judges.push(j.judge.clone());
                }
            }
        }
        if judges.len() < 2 {
            return None;
        }

        // Per item, each judge's rescored dimensions in `judges` order
        let items: Vec<Vec<DimensionScores>> = scored
            .iter()
            .filter_map(|s| {
                judges
                    .iter()
                    .map(|name| {
                        let j = s.record.judgements.iter().find(|j| &j.judge == name)?;
                        self.rescore(&j.scores).ok()
                    })
                    .collect::<Option<Vec<_>>>()
            })
            .collect();

        let overall: Vec<Vec<f64>> = items
            .iter()
            .map(|row| row.iter().map(DimensionScores::overall_score).collect())
            .collect();
        let dimensions = self
            .rubric
            .names()
            .map(|name| {
                let ratings: Vec<Vec<f64>> = items
                    .iter()
                    .filter_map(|row| row.iter().map(|d| d.value(name)).collect::<Option<Vec<f64>>>())
                    .collect();
                (name.to_string(), icc_2_1(&judges, &ratings))
            })
            .collect();

        Some(ReliabilityReport {
            overall: icc_2_1(&judges, &overall),
            dimensions,
            judges,
        })
    }
}

struct Scored<'a> {
    record: &'a CellRecord,
    overall: f64,
    dimensions: DimensionScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub cell: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// Completed cells whose scores entered the statistics
    pub analysed: usize,
    pub excluded: Vec<Exclusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub level: String,
    pub stats: Estimate<Descriptive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSummary {
    pub factor: String,
    pub levels: Vec<LevelStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    pub overall: Estimate<Descriptive>,
    pub by_profile: BTreeMap<String, Estimate<Descriptive>>,
}

/// Cohen's d of `treatment` over `control` within one factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectComparison {
    pub factor: String,
    pub treatment: String,
    pub control: String,
    pub effect: Estimate<EffectSize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityReport {
    /// Primary judge first
    pub judges: Vec<String>,
    pub overall: Estimate<Reliability>,
    pub dimensions: BTreeMap<String, Estimate<Reliability>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDistribution {
    pub architecture: Architecture,
    pub sessions: usize,
    pub outcomes: BTreeMap<Outcome, usize>,
    /// Synthesis reached without any revision (single-agent cells, or
    /// first-round acceptance under the prior-rejection policy)
    pub accepted_as_is: usize,
    pub unrevised_rounds: usize,
    pub concerns_persisted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub cell: String,
    pub kind: FailureKind,
    pub stage: FailureStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub total: usize,
    pub by_kind: BTreeMap<FailureKind, usize>,
    pub failures: Vec<FailureDetail>,
}

/// Structured statistics over one run's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub rubric_version: String,
    pub counts: CellCounts,
    pub overall: Estimate<Descriptive>,
    pub by_profile: BTreeMap<String, Estimate<Descriptive>>,
    pub by_scenario: BTreeMap<String, Estimate<Descriptive>>,
    pub by_architecture: BTreeMap<String, Estimate<Descriptive>>,
    pub by_factor: Vec<FactorSummary>,
    pub dimensions: BTreeMap<String, DimensionSummary>,
    pub effects: Vec<EffectComparison>,
    pub anova: Estimate<AnovaTable>,
    pub decompositions: BTreeMap<String, Estimate<Decomposition>>,
    /// Keyed `factor:across`
    pub interactions: BTreeMap<String, Estimate<InteractionContrast>>,
    /// Absent when fewer than two judges scored the run
    pub reliability: Option<ReliabilityReport>,
    pub outcomes: BTreeMap<String, OutcomeDistribution>,
    pub interventions: BTreeMap<String, BTreeMap<InterventionType, usize>>,
    pub failures: FailureSummary,
}

fn count_status(records: &[CellRecord], status: CellStatus) -> usize {
    records.iter().filter(|r| r.status == status).count()
}

fn profiles(records: &[CellRecord]) -> BTreeSet<String> {
    records.iter().map(|r| r.profile.clone()).collect()
}

/// Every group seen in `records` appears, so all-failed groups report no data.
fn group_by(
    records: &[CellRecord],
    scored: &[Scored<'_>],
    key: impl Fn(&CellRecord) -> Option<String>,
) -> BTreeMap<String, Estimate<Descriptive>> {
    let mut groups: BTreeMap<String, Vec<f64>> =
        records.iter().filter_map(&key).map(|k| (k, Vec::new())).collect();
    for s in scored {
        if let Some(k) = key(s.record) {
            groups.entry(k).or_default().push(s.overall);
        }
    }
    groups
        .into_iter()
        .map(|(k, values)| (k, Descriptive::of(&values)))
        .collect()
}

fn infer_factors(records: &[CellRecord]) -> Vec<AnovaFactor> {
    let mut levels: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for record in records {
        for (factor, level) in &record.levels {
            levels.entry(factor).or_default().insert(level);
        }
    }
    levels
        .into_iter()
        .map(|(name, levels)| AnovaFactor::new(name, levels))
        .collect()
}

fn values_at(scored: &[Scored<'_>], conditions: &[(&str, &str)]) -> Vec<f64> {
    scored
        .iter()
        .filter(|s| {
            conditions
                .iter()
                .all(|(f, l)| s.record.levels.get(*f).map(String::as_str) == Some(*l))
        })
        .map(|s| s.overall)
        .collect()
}

fn mean_at(scored: &[Scored<'_>], conditions: &[(&str, &str)]) -> Option<f64> {
    let values = values_at(scored, conditions);
    (!values.is_empty()).then(|| mean(&values))
}

fn factor_summary(factor: &AnovaFactor, scored: &[Scored<'_>]) -> FactorSummary {
    FactorSummary {
        factor: factor.name.clone(),
        levels: factor
            .levels
            .iter()
            .map(|level| {
                let values = values_at(scored, &[(factor.name.as_str(), level.as_str())]);
                LevelStats {
                    level: level.clone(),
                    stats: Descriptive::of(&values),
                }
            })
            .collect(),
    }
}

fn level_means(factor: &AnovaFactor, scored: &[Scored<'_>]) -> Vec<(String, Option<f64>)> {
    factor
        .levels
        .iter()
        .map(|level| (level.clone(), mean_at(scored, &[(factor.name.as_str(), level.as_str())])))
        .collect()
}

fn effect_comparisons(factors: &[AnovaFactor], scored: &[Scored<'_>]) -> Vec<EffectComparison> {
    let mut effects: Vec<EffectComparison> = factors
        .iter()
        .filter(|f| f.levels.len() == 2)
        .map(|f| {
            let name = f.name.as_str();
            let control = values_at(scored, &[(name, f.levels[0].as_str())]);
            let treatment = values_at(scored, &[(name, f.levels[1].as_str())]);
            EffectComparison {
                factor: f.name.clone(),
                treatment: f.levels[1].clone(),
                control: f.levels[0].clone(),
                effect: cohens_d(&treatment, &control),
            }
        })
        .collect();

    let by_architecture = |architecture| -> Vec<f64> {
        scored
            .iter()
            .filter(|s| s.record.architecture == architecture)
            .map(|s| s.overall)
            .collect()
    };
    let multi = by_architecture(Architecture::MultiAgent);
    let single = by_architecture(Architecture::SingleAgent);
    if !multi.is_empty() && !single.is_empty() {
        effects.push(EffectComparison {
            factor: "architecture".into(),
            treatment: Architecture::MultiAgent.to_string(),
            control: Architecture::SingleAgent.to_string(),
            effect: cohens_d(&multi, &single),
        });
    }
    effects
}

fn observations(factors: &[AnovaFactor], scored: &[Scored<'_>]) -> Vec<Observation> {
    scored
        .iter()
        .filter_map(|s| {
            let levels = factors
                .iter()
                .map(|f| {
                    let level = s.record.levels.get(&f.name)?;
                    f.levels.iter().position(|l| l == level)
                })
                .collect::<Option<Vec<usize>>>();
            if levels.is_none() {
                debug!(cell = %s.record.key(), "cell levels outside the factor design");
            }
            Some(Observation {
                levels: levels?,
                value: s.overall,
            })
        })
        .collect()
}

fn interactions(
    factors: &[AnovaFactor],
    scored: &[Scored<'_>],
) -> BTreeMap<String, Estimate<InteractionContrast>> {
    let two_level: Vec<&AnovaFactor> = factors.iter().filter(|f| f.levels.len() == 2).collect();
    let mut contrasts = BTreeMap::new();
    for (i, a) in two_level.iter().enumerate() {
        for b in &two_level[i + 1..] {
            let cell = |la: usize, lb: usize| {
                mean_at(
                    scored,
                    &[
                        (a.name.as_str(), a.levels[la].as_str()),
                        (b.name.as_str(), b.levels[lb].as_str()),
                    ],
                )
            };
            let contrast = interaction_contrast(
                (a.name.as_str(), [a.levels[0].as_str(), a.levels[1].as_str()]),
                (b.name.as_str(), [b.levels[0].as_str(), b.levels[1].as_str()]),
                [[cell(0, 0), cell(0, 1)], [cell(1, 0), cell(1, 1)]],
            );
            contrasts.insert(format!("{}:{}", a.name, b.name), contrast);
        }
    }
    contrasts
}

fn outcome_distributions(records: &[CellRecord]) -> BTreeMap<String, OutcomeDistribution> {
    let mut distributions: BTreeMap<String, OutcomeDistribution> = BTreeMap::new();
    for record in records {
        let Some(outcome) = record.outcome else {
            continue;
        };
        let d = distributions
            .entry(record.profile.clone())
            .or_insert_with(|| OutcomeDistribution {
                architecture: record.architecture,
                sessions: 0,
                outcomes: Outcome::ALL.iter().map(|o| (*o, 0)).collect(),
                accepted_as_is: 0,
                unrevised_rounds: 0,
                concerns_persisted: 0,
            });
        d.sessions += 1;
        *d.outcomes.entry(outcome).or_default() += 1;
        if record.accepted_as_is {
            d.accepted_as_is += 1;
        }
        d.unrevised_rounds += record.unrevised_rounds;
        d.concerns_persisted += record.concerns_persisted;
    }
    distributions
}

fn intervention_distributions(
    records: &[CellRecord],
) -> BTreeMap<String, BTreeMap<InterventionType, usize>> {
    let mut distributions: BTreeMap<String, BTreeMap<InterventionType, usize>> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.interventions.is_empty()) {
        let counts = distributions.entry(record.profile.clone()).or_default();
        for intervention in &record.interventions {
            *counts.entry(*intervention).or_default() += 1;
        }
    }
    distributions
}

fn failure_summary(records: &[CellRecord]) -> FailureSummary {
    let mut summary = FailureSummary::default();
    for record in records.iter().filter(|r| r.status == CellStatus::Failed) {
        summary.total += 1;
        if let Some(failure) = &record.failure {
            *summary.by_kind.entry(failure.kind).or_default() += 1;
            summary.failures.push(FailureDetail {
                cell: record.key().to_string(),
                kind: failure.kind,
                stage: failure.stage,
                reason: failure.reason.clone(),
            });
        }
    }
    summary
}

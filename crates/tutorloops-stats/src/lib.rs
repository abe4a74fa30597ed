//! Statistical analysis of evaluation results.
//!
//! Operates only on exported [`tutorloops_core::CellRecord`]s: overall and
//! per-dimension scores, outcomes and failures. Statistics that cannot be
//! computed from the data are reported as an [`Estimate`] variant instead of
//! a number, so one empty group never aborts the rest of the report.

mod anova;
mod decomposition;
mod descriptive;
mod effect;
mod error;
mod estimate;
mod icc;
mod report;

pub use anova::{anova, AnovaFactor, AnovaTable, AnovaTerm, Observation, Residual, TermStats};
pub use decomposition::{
    decompose, interaction_contrast, Decomposition, InteractionContrast, LevelGain, SimpleEffect,
};
pub use descriptive::{Descriptive, CONFIDENCE_LEVEL};
pub use effect::{cohens_d, EffectMagnitude, EffectSize};
pub use error::StatsError;
pub use estimate::Estimate;
pub use icc::{icc_2_1, RaterSummary, Reliability};
pub use report::{
    CellCounts, DimensionSummary, EffectComparison, Exclusion, FactorSummary, FailureDetail,
    FailureSummary, LevelStats, OutcomeDistribution, ReliabilityReport, StatisticsEngine,
    StatisticsReport, DEFAULT_INTERACTION_ORDER,
};

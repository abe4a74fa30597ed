use thiserror::Error;

use tutorloops_core::DimensionError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Invalid rubric: {0}")]
    Rubric(#[from] DimensionError),

    #[error("Confidence level {0} is outside (0, 1)")]
    ConfidenceLevel(f64),

    #[error("Interaction order must be at least 1")]
    InteractionOrder,
}

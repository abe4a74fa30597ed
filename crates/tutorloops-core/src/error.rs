use thiserror::Error;

use crate::design::CellKey;
use crate::session::Outcome;

/// Protocol violations and configuration errors in a negotiation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NegotiationError {
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Round {0} already has a critique attached")]
    RoundClosed(usize),

    #[error("Round {0} is still open")]
    RoundStillOpen(usize),

    #[error("No round is open")]
    NoOpenRound,

    #[error("Round budget of {0} exhausted")]
    RoundBudgetExceeded(usize),

    #[error("Session already terminated with outcome {0}")]
    AlreadyTerminated(Outcome),
}

/// Invalid rubric declarations and judge scores that do not fit the rubric
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DimensionError {
    #[error("Rubric has no dimensions")]
    EmptyRubric,

    #[error("Rubric dimension '{0}' is declared more than once")]
    DuplicateDimension(String),

    #[error("Rubric dimension '{name}' has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },

    #[error("Rubric weights sum to {0}, expected 1.0")]
    WeightSum(f64),

    #[error("Rubric scale {min}..={max} is empty")]
    InvalidScale { min: f64, max: f64 },

    #[error("Missing score for dimension '{0}'")]
    MissingDimension(String),

    #[error("Score {value} for '{dimension}' is outside {min}..={max}")]
    OutOfRange {
        dimension: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Invalid factor and scenario declarations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DesignError {
    #[error("Factor '{0}' has no levels")]
    EmptyFactor(String),

    #[error("Factor '{0}' is declared more than once")]
    DuplicateFactor(String),

    #[error("Factor '{factor}' repeats level '{level}'")]
    DuplicateLevel { factor: String, level: String },

    #[error("Factor '{factor}' marks '{level}' as multi-agent but has no such level")]
    UnknownMultiAgentLevel { factor: String, level: String },

    #[error("At least one scenario is required")]
    NoScenarios,

    #[error("Scenario '{0}' is declared more than once")]
    DuplicateScenario(String),

    #[error("Replications must be at least 1")]
    NoReplications,

    #[error("Profile '{0}' needs a critic but none is configured")]
    MissingCritic(String),

    #[error("Profile name '{0}' is produced by more than one level combination")]
    AmbiguousProfile(String),
}

/// Illegal transitions on the results store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Cell {0} is already declared")]
    Duplicate(CellKey),

    #[error("Cell {0} is not declared")]
    Unknown(CellKey),

    #[error("Cell {0} is already finished")]
    AlreadyFinished(CellKey),
}

/// Errors that abort a run before any cell executes
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Design error: {0}")]
    Design(#[from] DesignError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Parallelism must be at least 1")]
    InvalidParallelism,

    #[error("At least one judge is required")]
    NoJudges,

    #[error("This orchestrator has already run; create a new one for another run")]
    AlreadyRan,
}

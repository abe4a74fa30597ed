//! Negotiation engine and evaluation orchestrator.
//!
//! A [`NegotiationEngine`] drives one proposer/critic dialogue to a terminal
//! [`Outcome`]; the [`Orchestrator`] runs one such dialogue per cell of an
//! [`ExperimentDesign`], judges each transcript and records the results in a
//! [`ResultsStore`].

pub mod adapters;
mod capability;
mod cell;
mod design;
mod dimensions;
mod engine;
mod error;
mod orchestrator;
mod retry;
mod round;
mod session;
mod store;

pub use capability::{
    Candidate, CapabilityError, ChangeDetector, Critic, ExactChange, FailureKind, Judge,
    PriorCritique, ProposalContext, Proposer, TokenOverlapChange, Transcript,
};
pub use cell::{CellFailure, CellRecord, CellStatus, EvaluationCell, FailureStage, JudgeScores};
pub use design::{Architecture, CellKey, CellPlan, ExperimentDesign, Factor, Profile, Scenario};
pub use dimensions::{
    overall_score, Dimension, DimensionScore, DimensionScores, DimensionTable, OVERALL_SCALE,
    WEIGHT_TOLERANCE,
};
pub use engine::{CompromisePolicy, EngineConfig, NegotiationEngine};
pub use error::{DesignError, DimensionError, NegotiationError, RunError, StoreError};
pub use orchestrator::{Capabilities, Orchestrator, RunConfig, RunSummary};
pub use retry::{RetryPolicy, RetryingCritic, RetryingProposer};
pub use round::DialogueRound;
pub use session::{ExhaustionCause, NegotiationSession, Outcome};
pub use store::{ResultsStore, StoreCounts};

//! Capability contracts the core is parameterized by.
//!
//! Proposer, critic and judge are external collaborators; the core only sees
//! these traits and never the transport behind them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

use tutorloops_critic::Assessment;

use crate::design::{Architecture, Profile, Scenario};
use crate::round::DialogueRound;
use crate::session::Outcome;

/// A proposer's candidate output. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub content: String,
}

impl Candidate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Why an adapter call failed, as a reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network, process or rate-limit failure
    Transport,
    /// Per-call timeout expired
    Timeout,
    /// The adapter answered with an unusable payload
    Malformed,
    /// The run was interrupted before the cell started
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Malformed => write!(f, "malformed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error returned by any capability call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed output: {0}")]
    Malformed(String),
}

impl CapabilityError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CapabilityError::Transport(_) => FailureKind::Transport,
            CapabilityError::Timeout(_) => FailureKind::Timeout,
            CapabilityError::Malformed(_) => FailureKind::Malformed,
        }
    }
}

/// What the proposer and critic know about the cell they are serving.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    pub profile: &'a Profile,
    pub scenario: &'a Scenario,
    pub replication: usize,
    /// Index of the round being produced or assessed
    pub round: usize,
}

impl<'a> ProposalContext<'a> {
    pub fn at_round(self, round: usize) -> Self {
        Self { round, ..self }
    }
}

/// The critique a revision responds to.
#[derive(Debug, Clone, Copy)]
pub struct PriorCritique<'a> {
    pub candidate: &'a Candidate,
    pub assessment: &'a Assessment,
}

#[async_trait]
pub trait Proposer: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a candidate. `prior` is `None` for round 0.
    async fn propose(
        &self,
        context: &ProposalContext<'_>,
        prior: Option<PriorCritique<'_>>,
    ) -> Result<Candidate, CapabilityError>;
}

#[async_trait]
pub trait Critic: Send + Sync {
    fn name(&self) -> &str;

    /// Assess `candidate` given the closed rounds before it.
    async fn critique(
        &self,
        context: &ProposalContext<'_>,
        candidate: &Candidate,
        history: &[DialogueRound],
    ) -> Result<Assessment, CapabilityError>;
}

#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;

    /// Score a full transcript: dimension name -> value on the rubric scale.
    async fn score(&self, transcript: &Transcript) -> Result<BTreeMap<String, f64>, CapabilityError>;
}

/// Everything a judge sees for one cell: all rounds, not just the final output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub profile: String,
    pub levels: BTreeMap<String, String>,
    pub architecture: Architecture,
    pub scenario: String,
    pub context: String,
    pub rounds: Vec<DialogueRound>,
    pub outcome: Option<Outcome>,
    pub final_output: Option<Candidate>,
}

/// Decides whether a candidate differs materially from an earlier one.
pub trait ChangeDetector: Send + Sync {
    fn changed(&self, before: &Candidate, after: &Candidate) -> bool;
}

/// Any difference after whitespace normalization counts as a change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactChange;

impl ChangeDetector for ExactChange {
    fn changed(&self, before: &Candidate, after: &Candidate) -> bool {
        let a = before.content.split_whitespace();
        let b = after.content.split_whitespace();
        !a.eq(b)
    }
}

/// Changed when the Jaccard similarity of the word sets falls below
/// `similarity_threshold`.
#[derive(Debug, Clone, Copy)]
pub struct TokenOverlapChange {
    pub similarity_threshold: f64,
}

impl TokenOverlapChange {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn similarity(before: &str, after: &str) -> f64 {
        let a = word_set(before);
        let b = word_set(after);
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let shared = a.intersection(&b).count() as f64;
        let union = a.union(&b).count() as f64;
        shared / union
    }
}

impl ChangeDetector for TokenOverlapChange {
    fn changed(&self, before: &Candidate, after: &Candidate) -> bool {
        Self::similarity(&before.content, &after.content) < self.similarity_threshold
    }
}

fn word_set(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_change_ignores_whitespace() {
        let a = Candidate::new("Ask the learner  to\nextend the spiral");
        let b = Candidate::new("Ask the learner to extend the spiral");
        let c = Candidate::new("Ask the learner to extend the metaphor");
        assert!(!ExactChange.changed(&a, &b));
        assert!(ExactChange.changed(&a, &c));
    }

    #[test]
    fn test_token_overlap_similarity() {
        assert_eq!(TokenOverlapChange::similarity("a b c d", "a b c d"), 1.0);
        assert_eq!(TokenOverlapChange::similarity("a b", "c d"), 0.0);
        assert!((TokenOverlapChange::similarity("a b c", "a b d") - 0.5).abs() < 1e-12);
        assert_eq!(TokenOverlapChange::similarity("", ""), 1.0);
    }

    #[test]
    fn test_token_overlap_threshold() {
        let detector = TokenOverlapChange::new(0.8);
        let a = Candidate::new("Review the lecture on recognition");
        let b = Candidate::new("review the LECTURE on recognition!");
        let c = Candidate::new("Try the worked example on fractions");
        assert!(!detector.changed(&a, &b));
        assert!(detector.changed(&a, &c));
    }

    #[test]
    fn test_failure_kind_from_error() {
        assert_eq!(
            CapabilityError::Malformed("no json".into()).kind(),
            FailureKind::Malformed
        );
        assert_eq!(
            CapabilityError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Timeout
        );
    }
}

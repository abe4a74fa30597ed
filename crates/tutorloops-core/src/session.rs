use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use tutorloops_critic::Assessment;
use tutorloops_logging::AdapterRole;

use crate::capability::{Candidate, CapabilityError, FailureKind};
use crate::error::NegotiationError;
use crate::round::DialogueRound;

/// Terminal state of a negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The proposer materially revised and was then accepted
    Synthesis,
    /// Accepted without any material change
    Compromise,
    /// Rejection persisted through the full round budget
    Conflict,
    /// Ended by adapter failure or an empty revision budget
    Exhausted,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Synthesis,
        Outcome::Compromise,
        Outcome::Conflict,
        Outcome::Exhausted,
    ];
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Synthesis => write!(f, "synthesis"),
            Outcome::Compromise => write!(f, "compromise"),
            Outcome::Conflict => write!(f, "conflict"),
            Outcome::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Why a session ended `Exhausted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ExhaustionCause {
    /// A proposer or critic call failed after the orchestrator's retries
    AdapterFailure {
        role: AdapterRole,
        kind: FailureKind,
        reason: String,
    },
    /// The critic rejected and the budget allowed no revision (max_rounds = 1)
    NoRevisionBudget,
}

impl ExhaustionCause {
    pub fn adapter(role: AdapterRole, error: &CapabilityError) -> Self {
        ExhaustionCause::AdapterFailure {
            role,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

/// The ordered rounds of one proposer/critic dialogue and its outcome.
///
/// `outcome` is set exactly once, at termination; rounds cannot be added or
/// closed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSession {
    max_rounds: usize,
    rounds: Vec<DialogueRound>,
    outcome: Option<Outcome>,
    final_output: Option<Candidate>,
    /// Accepted as first proposed with no negotiation behind it
    accepted_as_is: bool,
    /// Degenerate session built for a single-agent cell
    single_agent: bool,
    exhaustion: Option<ExhaustionCause>,
    concerns_persisted: usize,
}

impl NegotiationSession {
    pub fn new(max_rounds: usize) -> Result<Self, NegotiationError> {
        if max_rounds == 0 {
            return Err(NegotiationError::InvalidConfig(
                "max_rounds must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_rounds,
            rounds: Vec::new(),
            outcome: None,
            final_output: None,
            accepted_as_is: false,
            single_agent: false,
            exhaustion: None,
            concerns_persisted: 0,
        })
    }

    /// One-round session for a cell without a critic: the draft is accepted
    /// as-is and tagged so it is never mistaken for multi-agent synthesis.
    pub fn single_agent(proposal: Candidate) -> Self {
        Self {
            max_rounds: 1,
            rounds: vec![DialogueRound::open(0, proposal.clone(), false)],
            outcome: Some(Outcome::Synthesis),
            final_output: Some(proposal),
            accepted_as_is: true,
            single_agent: true,
            exhaustion: None,
            concerns_persisted: 0,
        }
    }

    /// A single-agent cell whose only draft could not be produced.
    pub fn single_agent_exhausted(cause: ExhaustionCause) -> Self {
        Self {
            max_rounds: 1,
            rounds: Vec::new(),
            outcome: Some(Outcome::Exhausted),
            final_output: None,
            accepted_as_is: false,
            single_agent: true,
            exhaustion: Some(cause),
            concerns_persisted: 0,
        }
    }

    pub(crate) fn open_round(
        &mut self,
        proposal: Candidate,
        unrevised: bool,
    ) -> Result<usize, NegotiationError> {
        self.ensure_active()?;
        if self.rounds.len() >= self.max_rounds {
            return Err(NegotiationError::RoundBudgetExceeded(self.max_rounds));
        }
        if let Some(last) = self.rounds.last() {
            if !last.is_closed() {
                return Err(NegotiationError::RoundStillOpen(last.index()));
            }
        }
        let index = self.rounds.len();
        self.rounds.push(DialogueRound::open(index, proposal, unrevised));
        Ok(index)
    }

    pub(crate) fn attach_critique(&mut self, critique: Assessment) -> Result<(), NegotiationError> {
        self.ensure_active()?;
        let persisted = match self.rounds.iter().rev().nth(1).and_then(|r| r.critique()) {
            Some(previous) => count_persisted(&previous.concerns, &critique.concerns),
            None => 0,
        };
        let current = self
            .rounds
            .last_mut()
            .ok_or(NegotiationError::NoOpenRound)?;
        current.close(critique)?;
        self.concerns_persisted += persisted;
        Ok(())
    }

    /// Terminate with a substantive outcome; the last round's proposal is the
    /// final output.
    pub(crate) fn conclude(
        &mut self,
        outcome: Outcome,
        accepted_as_is: bool,
    ) -> Result<(), NegotiationError> {
        self.ensure_active()?;
        let last = self.rounds.last().ok_or(NegotiationError::NoOpenRound)?;
        self.final_output = Some(last.proposal().clone());
        self.accepted_as_is = accepted_as_is;
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Terminate `Exhausted`; the last proposal (if any) is kept as final output.
    pub(crate) fn exhaust(&mut self, cause: ExhaustionCause) -> Result<(), NegotiationError> {
        self.ensure_active()?;
        self.final_output = self.rounds.last().map(|r| r.proposal().clone());
        self.exhaustion = Some(cause);
        self.outcome = Some(Outcome::Exhausted);
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), NegotiationError> {
        match self.outcome {
            Some(outcome) => Err(NegotiationError::AlreadyTerminated(outcome)),
            None => Ok(()),
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn rounds(&self) -> &[DialogueRound] {
        &self.rounds
    }

    /// Rounds whose critique has been attached
    pub fn closed_rounds(&self) -> &[DialogueRound] {
        match self.rounds.last() {
            Some(last) if !last.is_closed() => &self.rounds[..self.rounds.len() - 1],
            _ => &self.rounds,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_terminated(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn final_output(&self) -> Option<&Candidate> {
        self.final_output.as_ref()
    }

    pub fn accepted_as_is(&self) -> bool {
        self.accepted_as_is
    }

    pub fn is_single_agent(&self) -> bool {
        self.single_agent
    }

    pub fn exhaustion(&self) -> Option<&ExhaustionCause> {
        self.exhaustion.as_ref()
    }

    /// Number of critique steps taken
    pub fn critiques(&self) -> usize {
        self.rounds.iter().filter(|r| r.is_closed()).count()
    }

    /// Rounds in which the proposer resubmitted an unchanged candidate
    pub fn unrevised_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.unrevised()).count()
    }

    /// Concerns raised again in the critique right after they were first raised
    pub fn concerns_persisted(&self) -> usize {
        self.concerns_persisted
    }
}

fn normalize(concern: &str) -> String {
    concern.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn count_persisted(previous: &[String], current: &[String]) -> usize {
    let earlier: BTreeSet<String> = previous.iter().map(|c| normalize(c)).collect();
    current
        .iter()
        .map(|c| normalize(c))
        .collect::<BTreeSet<_>>()
        .iter()
        .filter(|c| earlier.contains(*c))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_round_budget_is_rejected() {
        assert!(matches!(
            NegotiationSession::new(0),
            Err(NegotiationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rounds_are_frozen_after_termination() {
        let mut session = NegotiationSession::new(3).unwrap();
        session.open_round(Candidate::new("draft"), false).unwrap();
        session.attach_critique(Assessment::accept(0.9)).unwrap();
        session.conclude(Outcome::Compromise, false).unwrap();

        assert!(session.is_terminated());
        assert!(matches!(
            session.open_round(Candidate::new("late"), false),
            Err(NegotiationError::AlreadyTerminated(Outcome::Compromise))
        ));
        assert!(session.exhaust(ExhaustionCause::NoRevisionBudget).is_err());
        assert_eq!(session.rounds().len(), 1);
        assert_eq!(session.outcome(), Some(Outcome::Compromise));
    }

    #[test]
    fn test_cannot_open_round_while_previous_is_open() {
        let mut session = NegotiationSession::new(3).unwrap();
        session.open_round(Candidate::new("draft"), false).unwrap();
        assert!(matches!(
            session.open_round(Candidate::new("again"), false),
            Err(NegotiationError::RoundStillOpen(0))
        ));
    }

    #[test]
    fn test_round_budget_is_enforced() {
        let mut session = NegotiationSession::new(1).unwrap();
        session.open_round(Candidate::new("draft"), false).unwrap();
        session.attach_critique(Assessment::reject(0.9, vec![])).unwrap();
        assert!(matches!(
            session.open_round(Candidate::new("second"), false),
            Err(NegotiationError::RoundBudgetExceeded(1))
        ));
    }

    #[test]
    fn test_concerns_persisted_counts_repeats_between_consecutive_critiques() {
        let mut session = NegotiationSession::new(3).unwrap();
        session.open_round(Candidate::new("v1"), false).unwrap();
        session
            .attach_critique(Assessment::reject(
                0.8,
                vec!["Too directive".into(), "ignores learner".into()],
            ))
            .unwrap();
        session.open_round(Candidate::new("v1"), true).unwrap();
        session
            .attach_critique(Assessment::reject(
                0.8,
                vec!["too  directive".into(), "new issue".into()],
            ))
            .unwrap();

        assert_eq!(session.concerns_persisted(), 1);
        assert_eq!(session.unrevised_rounds(), 1);
        assert_eq!(session.critiques(), 2);
    }

    #[test]
    fn test_exhaust_keeps_last_proposal() {
        let mut session = NegotiationSession::new(2).unwrap();
        session.open_round(Candidate::new("draft"), false).unwrap();
        session
            .exhaust(ExhaustionCause::adapter(
                AdapterRole::Critic,
                &CapabilityError::Transport("connection reset".into()),
            ))
            .unwrap();

        assert_eq!(session.outcome(), Some(Outcome::Exhausted));
        assert_eq!(session.final_output(), Some(&Candidate::new("draft")));
        assert!(session.closed_rounds().is_empty());
    }

    #[test]
    fn test_single_agent_session_is_tagged() {
        let session = NegotiationSession::single_agent(Candidate::new("as drafted"));
        assert_eq!(session.outcome(), Some(Outcome::Synthesis));
        assert!(session.is_single_agent());
        assert!(session.accepted_as_is());
        assert_eq!(session.critiques(), 0);
    }
}

use serde::{Deserialize, Serialize};
use tracing::debug;

use tutorloops_logging::AdapterRole;

use crate::capability::{ChangeDetector, Critic, PriorCritique, ProposalContext, Proposer};
use crate::error::NegotiationError;
use crate::session::{ExhaustionCause, NegotiationSession, Outcome};

/// How an acceptance without material change is classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompromisePolicy {
    /// Any acceptance without a material proposer change is a compromise
    #[default]
    AcceptanceWithoutChange,
    /// Compromise needs at least one rejection first; an unchanged first-round
    /// acceptance is reported as synthesis flagged `accepted_as_is`
    RequirePriorRejection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub max_rounds: usize,
    pub approval_threshold: f64,
    pub compromise_policy: CompromisePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            approval_threshold: 0.7,
            compromise_policy: CompromisePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), NegotiationError> {
        if self.max_rounds == 0 {
            return Err(NegotiationError::InvalidConfig(
                "max_rounds must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.approval_threshold) {
            return Err(NegotiationError::InvalidConfig(format!(
                "approval_threshold {} is outside [0, 1]",
                self.approval_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Drafting,
    Critiquing,
    Revising,
}

/// Drives one proposer/critic dialogue to a terminal outcome.
///
/// The engine never retries: the capabilities it is given are expected to
/// have absorbed transient failures already, so any error it sees ends the
/// session `Exhausted`.
pub struct NegotiationEngine<'a> {
    proposer: &'a dyn Proposer,
    critic: &'a dyn Critic,
    change: &'a dyn ChangeDetector,
    config: &'a EngineConfig,
}

impl<'a> NegotiationEngine<'a> {
    pub fn new(
        proposer: &'a dyn Proposer,
        critic: &'a dyn Critic,
        change: &'a dyn ChangeDetector,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            proposer,
            critic,
            change,
            config,
        }
    }

    pub async fn negotiate(
        &self,
        context: ProposalContext<'_>,
    ) -> Result<NegotiationSession, NegotiationError> {
        self.config.validate()?;
        let mut session = NegotiationSession::new(self.config.max_rounds)?;
        let mut state = State::Drafting;

        while !session.is_terminated() {
            debug!(?state, round = session.rounds().len(), "Negotiation step");
            state = match state {
                State::Drafting => self.draft(&mut session, context).await?,
                State::Critiquing => self.critique(&mut session, context).await?,
                State::Revising => self.revise(&mut session, context).await?,
            };
        }

        Ok(session)
    }

    async fn draft(
        &self,
        session: &mut NegotiationSession,
        context: ProposalContext<'_>,
    ) -> Result<State, NegotiationError> {
        match self.proposer.propose(&context.at_round(0), None).await {
            Ok(candidate) => {
                session.open_round(candidate, false)?;
            }
            Err(e) => {
                session.exhaust(ExhaustionCause::adapter(AdapterRole::Proposer, &e))?;
            }
        }
        Ok(State::Critiquing)
    }

    async fn critique(
        &self,
        session: &mut NegotiationSession,
        context: ProposalContext<'_>,
    ) -> Result<State, NegotiationError> {
        let round = session.rounds().len() - 1;
        let result = {
            let candidate = session.rounds()[round].proposal();
            self.critic
                .critique(&context.at_round(round), candidate, session.closed_rounds())
                .await
        };

        let assessment = match result {
            Ok(assessment) => assessment,
            Err(e) => {
                session.exhaust(ExhaustionCause::adapter(AdapterRole::Critic, &e))?;
                return Ok(State::Critiquing);
            }
        };

        let approved =
            assessment.accepted && assessment.confidence >= self.config.approval_threshold;
        let changed = self.change.changed(
            session.rounds()[0].proposal(),
            session.rounds()[round].proposal(),
        );
        session.attach_critique(assessment)?;

        if approved {
            let (outcome, accepted_as_is) = self.classify_acceptance(changed, round);
            session.conclude(outcome, accepted_as_is)?;
            return Ok(State::Critiquing);
        }

        if round + 1 < self.config.max_rounds {
            return Ok(State::Revising);
        }

        if round == 0 {
            // Conflict needs at least one revision attempt
            session.exhaust(ExhaustionCause::NoRevisionBudget)?;
        } else {
            session.conclude(Outcome::Conflict, false)?;
        }
        Ok(State::Critiquing)
    }

    async fn revise(
        &self,
        session: &mut NegotiationSession,
        context: ProposalContext<'_>,
    ) -> Result<State, NegotiationError> {
        let next = session.rounds().len();
        let result = {
            let last = &session.rounds()[next - 1];
            let prior = last.critique().map(|assessment| PriorCritique {
                candidate: last.proposal(),
                assessment,
            });
            self.proposer.propose(&context.at_round(next), prior).await
        };

        match result {
            Ok(candidate) => {
                let unrevised = !self
                    .change
                    .changed(session.rounds()[next - 1].proposal(), &candidate);
                session.open_round(candidate, unrevised)?;
            }
            Err(e) => {
                session.exhaust(ExhaustionCause::adapter(AdapterRole::Proposer, &e))?;
            }
        }
        Ok(State::Critiquing)
    }

    fn classify_acceptance(&self, changed: bool, round: usize) -> (Outcome, bool) {
        if changed {
            return (Outcome::Synthesis, false);
        }
        match self.config.compromise_policy {
            CompromisePolicy::AcceptanceWithoutChange => (Outcome::Compromise, false),
            CompromisePolicy::RequirePriorRejection if round == 0 => (Outcome::Synthesis, true),
            CompromisePolicy::RequirePriorRejection => (Outcome::Compromise, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Candidate, CapabilityError, ExactChange};
    use crate::design::{Architecture, Profile, Scenario};
    use crate::round::DialogueRound;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tutorloops_critic::Assessment;

    struct Drafts(Mutex<Vec<Result<Candidate, CapabilityError>>>);

    #[async_trait]
    impl Proposer for Drafts {
        fn name(&self) -> &str {
            "drafts"
        }

        async fn propose(
            &self,
            _context: &ProposalContext<'_>,
            _prior: Option<PriorCritique<'_>>,
        ) -> Result<Candidate, CapabilityError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    struct Verdicts(Mutex<Vec<Result<Assessment, CapabilityError>>>);

    #[async_trait]
    impl Critic for Verdicts {
        fn name(&self) -> &str {
            "verdicts"
        }

        async fn critique(
            &self,
            context: &ProposalContext<'_>,
            _candidate: &Candidate,
            history: &[DialogueRound],
        ) -> Result<Assessment, CapabilityError> {
            assert_eq!(history.len(), context.round);
            self.0.lock().unwrap().remove(0)
        }
    }

    fn drafts(texts: &[&str]) -> Drafts {
        Drafts(Mutex::new(
            texts.iter().map(|t| Ok(Candidate::new(*t))).collect(),
        ))
    }

    fn verdicts(list: Vec<Assessment>) -> Verdicts {
        Verdicts(Mutex::new(list.into_iter().map(Ok).collect()))
    }

    fn fixture() -> (Profile, Scenario) {
        (
            Profile {
                name: "recog_multi".into(),
                levels: BTreeMap::new(),
                architecture: Architecture::MultiAgent,
            },
            Scenario {
                id: "struggling_learner".into(),
                context: "The learner is stuck on recursion".into(),
            },
        )
    }

    async fn run(
        proposer: &Drafts,
        critic: &Verdicts,
        config: EngineConfig,
    ) -> NegotiationSession {
        let (profile, scenario) = fixture();
        let context = ProposalContext {
            profile: &profile,
            scenario: &scenario,
            replication: 0,
            round: 0,
        };
        NegotiationEngine::new(proposer, critic, &ExactChange, &config)
            .negotiate(context)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_revision_then_acceptance_is_synthesis() {
        let proposer = drafts(&["lecture on recursion", "ask what the base case is"]);
        let critic = verdicts(vec![
            Assessment::reject(0.9, vec!["too directive".into()]),
            Assessment::accept(0.85),
        ]);
        let session = run(&proposer, &critic, EngineConfig::default()).await;

        assert_eq!(session.outcome(), Some(Outcome::Synthesis));
        assert_eq!(session.rounds().len(), 2);
        assert_eq!(
            session.final_output(),
            Some(&Candidate::new("ask what the base case is"))
        );
    }

    #[tokio::test]
    async fn test_first_round_acceptance_is_compromise() {
        let proposer = drafts(&["ask what the base case is"]);
        let critic = verdicts(vec![Assessment::accept(0.9)]);
        let session = run(&proposer, &critic, EngineConfig::default()).await;

        assert_eq!(session.outcome(), Some(Outcome::Compromise));
        assert!(!session.accepted_as_is());
    }

    #[tokio::test]
    async fn test_prior_rejection_policy_tags_first_round_acceptance() {
        let proposer = drafts(&["ask what the base case is"]);
        let critic = verdicts(vec![Assessment::accept(0.9)]);
        let config = EngineConfig {
            compromise_policy: CompromisePolicy::RequirePriorRejection,
            ..EngineConfig::default()
        };
        let session = run(&proposer, &critic, config).await;

        assert_eq!(session.outcome(), Some(Outcome::Synthesis));
        assert!(session.accepted_as_is());
    }

    #[tokio::test]
    async fn test_low_confidence_acceptance_counts_as_rejection() {
        let proposer = drafts(&["v1", "v2"]);
        let critic = verdicts(vec![Assessment::accept(0.5), Assessment::accept(0.5)]);
        let config = EngineConfig {
            max_rounds: 2,
            ..EngineConfig::default()
        };
        let session = run(&proposer, &critic, config).await;

        assert_eq!(session.outcome(), Some(Outcome::Conflict));
        assert_eq!(session.critiques(), 2);
    }

    #[tokio::test]
    async fn test_single_round_rejection_is_exhausted_not_conflict() {
        let proposer = drafts(&["v1"]);
        let critic = verdicts(vec![Assessment::reject(0.9, vec!["off topic".into()])]);
        let config = EngineConfig {
            max_rounds: 1,
            ..EngineConfig::default()
        };
        let session = run(&proposer, &critic, config).await;

        assert_eq!(session.outcome(), Some(Outcome::Exhausted));
        assert_eq!(session.exhaustion(), Some(&ExhaustionCause::NoRevisionBudget));
        assert_eq!(session.final_output(), Some(&Candidate::new("v1")));
    }

    #[tokio::test]
    async fn test_unchanged_resubmission_is_still_critiqued() {
        let proposer = drafts(&["same", "same", "same"]);
        let critic = verdicts(vec![
            Assessment::reject(0.9, vec!["too long".into()]),
            Assessment::reject(0.9, vec!["too long".into()]),
            Assessment::accept(0.95),
        ]);
        let session = run(&proposer, &critic, EngineConfig::default()).await;

        assert_eq!(session.critiques(), 3);
        assert_eq!(session.unrevised_rounds(), 2);
        assert_eq!(session.concerns_persisted(), 1);
        assert_eq!(session.outcome(), Some(Outcome::Compromise));
    }

    #[tokio::test]
    async fn test_critic_failure_exhausts_session() {
        let proposer = drafts(&["v1"]);
        let critic = Verdicts(Mutex::new(vec![Err(CapabilityError::Malformed(
            "no verdict".into(),
        ))]));
        let session = run(&proposer, &critic, EngineConfig::default()).await;

        assert_eq!(session.outcome(), Some(Outcome::Exhausted));
        assert!(matches!(
            session.exhaustion(),
            Some(ExhaustionCause::AdapterFailure {
                role: AdapterRole::Critic,
                ..
            })
        ));
        assert_eq!(session.critiques(), 0);
    }

    #[tokio::test]
    async fn test_proposer_failure_on_draft_leaves_no_rounds() {
        let proposer = Drafts(Mutex::new(vec![Err(CapabilityError::Transport(
            "rate limited".into(),
        ))]));
        let critic = verdicts(vec![]);
        let session = run(&proposer, &critic, EngineConfig::default()).await;

        assert_eq!(session.outcome(), Some(Outcome::Exhausted));
        assert!(session.rounds().is_empty());
        assert!(session.final_output().is_none());
    }

    #[test]
    fn test_config_validation() {
        let bad_rounds = EngineConfig {
            max_rounds: 0,
            ..EngineConfig::default()
        };
        let bad_threshold = EngineConfig {
            approval_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(bad_rounds.validate().is_err());
        assert!(bad_threshold.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }
}

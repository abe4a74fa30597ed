use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use tutorloops_core::{
    overall_score, Architecture, Candidate, CapabilityError, CompromisePolicy, Critic,
    DialogueRound, DimensionTable, EngineConfig, ExactChange, NegotiationEngine, Outcome,
    PriorCritique, Profile, ProposalContext, Proposer, Scenario,
};
use tutorloops_critic::Assessment;

/// One scripted step: what the proposer does, then what the critic says.
#[derive(Debug, Clone)]
struct Step {
    revise: bool,
    proposer_fails: bool,
    accepted: bool,
    confidence: f64,
    critic_fails: bool,
}

fn step() -> impl Strategy<Value = Step> {
    (
        any::<bool>(),
        prop::bool::weighted(0.1),
        any::<bool>(),
        0.0f64..=1.0,
        prop::bool::weighted(0.1),
    )
        .prop_map(|(revise, proposer_fails, accepted, confidence, critic_fails)| Step {
            revise,
            proposer_fails,
            accepted,
            confidence,
            critic_fails,
        })
}

struct StepProposer(Mutex<VecDeque<Step>>);

#[async_trait]
impl Proposer for StepProposer {
    fn name(&self) -> &str {
        "steps"
    }

    async fn propose(
        &self,
        context: &ProposalContext<'_>,
        prior: Option<PriorCritique<'_>>,
    ) -> Result<Candidate, CapabilityError> {
        let step = self.0.lock().unwrap().front().cloned();
        match (step, prior) {
            (Some(s), _) if s.proposer_fails => Err(CapabilityError::Transport("down".into())),
            (Some(s), Some(p)) if !s.revise => Ok(p.candidate.clone()),
            _ => Ok(Candidate::new(format!("candidate {}", context.round))),
        }
    }
}

struct StepCritic<'a>(&'a StepProposer);

#[async_trait]
impl Critic for StepCritic<'_> {
    fn name(&self) -> &str {
        "steps"
    }

    async fn critique(
        &self,
        _context: &ProposalContext<'_>,
        _candidate: &Candidate,
        _history: &[DialogueRound],
    ) -> Result<Assessment, CapabilityError> {
        let step = self.0 .0.lock().unwrap().pop_front();
        match step {
            Some(s) if s.critic_fails => Err(CapabilityError::Malformed("garbled".into())),
            Some(s) if s.accepted => Ok(Assessment::accept(s.confidence)),
            Some(s) => Ok(Assessment::reject(s.confidence, vec!["again".into()])),
            None => Ok(Assessment::reject(1.0, vec![])),
        }
    }
}

fn negotiate(
    steps: Vec<Step>,
    config: &EngineConfig,
) -> tutorloops_core::NegotiationSession {
    let profile = Profile {
        name: "multi".into(),
        levels: BTreeMap::new(),
        architecture: Architecture::MultiAgent,
    };
    let scenario = Scenario::new("s", "");
    let context = ProposalContext {
        profile: &profile,
        scenario: &scenario,
        replication: 0,
        round: 0,
    };
    let proposer = StepProposer(Mutex::new(steps.into()));
    let critic = StepCritic(&proposer);
    futures::executor::block_on(
        NegotiationEngine::new(&proposer, &critic, &ExactChange, config).negotiate(context),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn prop_session_terminates_within_round_budget(
        max_rounds in 1usize..6,
        threshold in 0.0f64..=1.0,
        prior_rejection in any::<bool>(),
        steps in prop::collection::vec(step(), 0..8),
    ) {
        let config = EngineConfig {
            max_rounds,
            approval_threshold: threshold,
            compromise_policy: if prior_rejection {
                CompromisePolicy::RequirePriorRejection
            } else {
                CompromisePolicy::AcceptanceWithoutChange
            },
        };
        let session = negotiate(steps, &config);

        prop_assert!(session.is_terminated());
        prop_assert!(session.critiques() <= max_rounds);
        prop_assert!(session.rounds().len() <= max_rounds);

        let outcome = session.outcome().unwrap();
        prop_assert!(Outcome::ALL.contains(&outcome));
        if max_rounds == 1 {
            prop_assert_ne!(outcome, Outcome::Conflict);
        }
        if outcome == Outcome::Conflict {
            prop_assert_eq!(session.critiques(), max_rounds);
        }
        if outcome == Outcome::Exhausted {
            prop_assert!(session.exhaustion().is_some());
        } else {
            prop_assert!(session.exhaustion().is_none());
            prop_assert!(session.final_output().is_some());
        }

        // Every round but possibly the last is closed
        let open = session.rounds().iter().filter(|r| !r.is_closed()).count();
        prop_assert!(open <= 1);
        for (i, round) in session.rounds().iter().enumerate() {
            prop_assert_eq!(round.index(), i);
        }
    }

    #[test]
    fn prop_overall_score_is_bounded_and_pure(
        values in prop::collection::vec(-10.0f64..10.0, 1..6),
        raw_weights in prop::collection::vec(0.01f64..1.0, 1..6),
    ) {
        let n = values.len().min(raw_weights.len());
        let total: f64 = raw_weights[..n].iter().sum();
        let pairs: Vec<(f64, f64)> = values[..n]
            .iter()
            .zip(&raw_weights[..n])
            .map(|(v, w)| (*v, w / total))
            .collect();

        let first = overall_score(pairs.iter().copied());
        let second = overall_score(pairs.iter().copied());
        prop_assert!((0.0..=100.0).contains(&first));
        prop_assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn prop_in_scale_scores_map_into_range(
        values in prop::collection::vec(1.0f64..=5.0, 3),
    ) {
        let table = DimensionTable::from_weights(
            "v1",
            [("relevance", 0.5), ("tone", 0.3), ("specificity", 0.2)],
        ).unwrap();
        let raw: BTreeMap<String, f64> = table
            .names()
            .map(str::to_string)
            .zip(values.iter().copied())
            .collect();
        let scores = table.score(&raw).unwrap();
        let overall = scores.overall_score();
        prop_assert!((20.0 - 1e-9..=100.0 + 1e-9).contains(&overall));
        prop_assert_eq!(overall.to_bits(), scores.overall_score().to_bits());
    }
}

//! Deterministic capabilities shared by the integration tests.
//!
//! Every answer is a pure function of the cell and round it is asked about,
//! so repeated runs produce identical records regardless of scheduling.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tutorloops_core::{
    Candidate, Capabilities, CapabilityError, Critic, DialogueRound, DimensionTable, ExactChange,
    Judge, PriorCritique, ProposalContext, Proposer, Transcript,
};
use tutorloops_critic::{Assessment, InterventionType};

type CallKey = (String, String, usize, usize);

fn call_key(context: &ProposalContext<'_>) -> CallKey {
    (
        context.profile.name.clone(),
        context.scenario.id.clone(),
        context.replication,
        context.round,
    )
}

/// Drafts `draft:<scenario>:<rep>` and, when revising, `revision<n>:...`.
#[derive(Default)]
pub struct ScriptedProposer {
    /// Resubmit the previous candidate instead of revising
    pub stubborn: bool,
    /// Scenarios whose every call fails
    pub failing: BTreeSet<String>,
    pub failure: Option<CapabilityError>,
    /// Fail the first N calls for each (cell, round)
    pub flaky: u32,
    pub calls: Mutex<HashMap<CallKey, u32>>,
}

impl ScriptedProposer {
    pub fn failing_on(scenarios: &[&str], failure: CapabilityError) -> Self {
        Self {
            failing: scenarios.iter().map(|s| s.to_string()).collect(),
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn flaky(failures: u32) -> Self {
        Self {
            flaky: failures,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Proposer for ScriptedProposer {
    fn name(&self) -> &str {
        "scripted-proposer"
    }

    async fn propose(
        &self,
        context: &ProposalContext<'_>,
        prior: Option<PriorCritique<'_>>,
    ) -> Result<Candidate, CapabilityError> {
        if self.failing.contains(&context.scenario.id) {
            return Err(self
                .failure
                .clone()
                .unwrap_or_else(|| CapabilityError::Transport("unreachable".into())));
        }

        if self.flaky > 0 {
            let mut calls = self.calls.lock().unwrap();
            let seen = calls.entry(call_key(context)).or_insert(0);
            *seen += 1;
            if *seen <= self.flaky {
                return Err(CapabilityError::Transport("503 overloaded".into()));
            }
        }

        match prior {
            Some(p) if self.stubborn => Ok(p.candidate.clone()),
            Some(_) => Ok(Candidate::new(format!(
                "revision{}:{}:{}",
                context.round, context.scenario.id, context.replication
            ))),
            None => Ok(Candidate::new(format!(
                "draft:{}:{}",
                context.scenario.id, context.replication
            ))),
        }
    }
}

/// Accepts from round `accept_from` on; rejects before that.
pub struct ScriptedCritic {
    pub accept_from: usize,
    pub confidence: f64,
}

impl ScriptedCritic {
    pub fn accepting_at(round: usize) -> Self {
        Self {
            accept_from: round,
            confidence: 0.9,
        }
    }

    pub fn never_accepting() -> Self {
        Self::accepting_at(usize::MAX)
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    fn name(&self) -> &str {
        "scripted-critic"
    }

    async fn critique(
        &self,
        context: &ProposalContext<'_>,
        _candidate: &Candidate,
        history: &[DialogueRound],
    ) -> Result<Assessment, CapabilityError> {
        assert_eq!(history.len(), context.round, "history must hold closed rounds only");
        if context.round >= self.accept_from {
            Ok(Assessment::accept(self.confidence))
        } else {
            Ok(Assessment::reject(
                self.confidence,
                vec!["ask a question instead of lecturing".into()],
            )
            .with_intervention(InterventionType::Modify))
        }
    }
}

/// Scores each dimension from the profile's levels: every level named `on`
/// or `multi` adds one point to a base of 2, plus `offset`.
#[derive(Default)]
pub struct RubricJudge {
    pub name: String,
    pub offset: f64,
    /// Scenarios for which the judge answers with an unusable payload
    pub malformed: BTreeSet<String>,
}

impl RubricJudge {
    pub fn named(name: &str, offset: f64) -> Self {
        Self {
            name: name.to_string(),
            offset,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Judge for RubricJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(
        &self,
        transcript: &Transcript,
    ) -> Result<BTreeMap<String, f64>, CapabilityError> {
        if self.malformed.contains(&transcript.scenario) {
            // Missing dimensions are rejected by the rubric
            return Ok(BTreeMap::from([("relevance".to_string(), 3.0)]));
        }
        let bonus = transcript
            .levels
            .values()
            .filter(|l| l.as_str() == "on" || l.as_str() == "multi")
            .count() as f64;
        let value = (2.0 + bonus + self.offset).clamp(1.0, 5.0);
        Ok(BTreeMap::from([
            ("relevance".to_string(), value),
            ("tone".to_string(), value),
        ]))
    }
}

pub fn rubric() -> DimensionTable {
    DimensionTable::from_weights("test", [("relevance", 0.6), ("tone", 0.4)]).unwrap()
}

pub fn capabilities(
    proposer: ScriptedProposer,
    critic: Option<ScriptedCritic>,
    judges: Vec<RubricJudge>,
) -> Capabilities {
    Capabilities {
        proposer: Arc::new(proposer),
        critic: critic.map(|c| Arc::new(c) as Arc<dyn Critic>),
        judges: judges
            .into_iter()
            .map(|j| Arc::new(j) as Arc<dyn Judge>)
            .collect(),
        change_detector: Arc::new(ExactChange),
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tutorloops_critic::InterventionType;

use crate::capability::FailureKind;
use crate::design::{Architecture, CellKey, CellPlan};
use crate::dimensions::DimensionScores;
use crate::session::{NegotiationSession, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellStatus::Pending => write!(f, "pending"),
            CellStatus::Completed => write!(f, "completed"),
            CellStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where in the cell's lifecycle the failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Negotiation,
    Judging,
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellFailure {
    pub kind: FailureKind,
    pub stage: FailureStage,
    pub reason: String,
}

impl CellFailure {
    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            stage: FailureStage::NotStarted,
            reason: "run interrupted before the cell started".into(),
        }
    }
}

/// One judge's scores for a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeScores {
    pub judge: String,
    pub scores: DimensionScores,
}

/// One (profile, scenario, replication) unit of work
#[derive(Debug, Clone)]
pub struct EvaluationCell {
    key: CellKey,
    levels: BTreeMap<String, String>,
    architecture: Architecture,
    status: CellStatus,
    session: Option<NegotiationSession>,
    judgements: Vec<JudgeScores>,
    failure: Option<CellFailure>,
}

impl EvaluationCell {
    pub fn pending(plan: &CellPlan) -> Self {
        Self {
            key: plan.key.clone(),
            levels: plan.profile.levels.clone(),
            architecture: plan.profile.architecture,
            status: CellStatus::Pending,
            session: None,
            judgements: Vec::new(),
            failure: None,
        }
    }

    pub(crate) fn complete(&mut self, session: NegotiationSession, judgements: Vec<JudgeScores>) {
        self.status = CellStatus::Completed;
        self.session = Some(session);
        self.judgements = judgements;
    }

    pub(crate) fn fail(&mut self, session: Option<NegotiationSession>, failure: CellFailure) {
        self.status = CellStatus::Failed;
        self.session = session;
        self.failure = Some(failure);
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn status(&self) -> CellStatus {
        self.status
    }

    pub fn session(&self) -> Option<&NegotiationSession> {
        self.session.as_ref()
    }

    pub fn failure(&self) -> Option<&CellFailure> {
        self.failure.as_ref()
    }

    /// The primary judge's scores
    pub fn dimension_scores(&self) -> Option<&DimensionScores> {
        self.judgements.first().map(|j| &j.scores)
    }

    pub fn overall_score(&self) -> Option<f64> {
        self.dimension_scores().map(DimensionScores::overall_score)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.session.as_ref().and_then(NegotiationSession::outcome)
    }

    /// Flatten into the exported per-cell row.
    pub fn record(&self, include_session: bool) -> CellRecord {
        let session = self.session.as_ref();
        CellRecord {
            profile: self.key.profile.clone(),
            scenario: self.key.scenario.clone(),
            replication: self.key.replication,
            architecture: self.architecture,
            levels: self.levels.clone(),
            status: self.status,
            overall_score: self.overall_score(),
            dimension_scores: self.dimension_scores().cloned(),
            judgements: self.judgements.clone(),
            outcome: self.outcome(),
            accepted_as_is: session.is_some_and(NegotiationSession::accepted_as_is),
            rounds: session.map_or(0, |s| s.rounds().len()),
            unrevised_rounds: session.map_or(0, NegotiationSession::unrevised_rounds),
            concerns_persisted: session.map_or(0, NegotiationSession::concerns_persisted),
            interventions: session
                .map(|s| {
                    s.rounds()
                        .iter()
                        .filter_map(|r| r.critique().map(|c| c.intervention))
                        .collect()
                })
                .unwrap_or_default(),
            failure: self.failure.clone(),
            session: if include_session {
                self.session.clone()
            } else {
                None
            },
        }
    }
}

/// Tabular export row for one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub profile: String,
    pub scenario: String,
    pub replication: usize,
    pub architecture: Architecture,
    #[serde(default)]
    pub levels: BTreeMap<String, String>,
    pub status: CellStatus,
    pub overall_score: Option<f64>,
    pub dimension_scores: Option<DimensionScores>,
    /// Every judge's scores, primary first
    #[serde(default)]
    pub judgements: Vec<JudgeScores>,
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub accepted_as_is: bool,
    #[serde(default)]
    pub rounds: usize,
    #[serde(default)]
    pub unrevised_rounds: usize,
    #[serde(default)]
    pub concerns_persisted: usize,
    #[serde(default)]
    pub interventions: Vec<InterventionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CellFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<NegotiationSession>,
}

impl CellRecord {
    pub fn key(&self) -> CellKey {
        CellKey::new(&self.profile, &self.scenario, self.replication)
    }

    pub fn is_completed(&self) -> bool {
        self.status == CellStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Candidate;
    use crate::design::{Profile, Scenario};
    use crate::dimensions::DimensionTable;

    fn plan() -> CellPlan {
        CellPlan {
            key: CellKey::new("base", "s1", 0),
            profile: Profile {
                name: "base".into(),
                levels: BTreeMap::from([("recognition".to_string(), "off".to_string())]),
                architecture: Architecture::SingleAgent,
            },
            scenario: Scenario::new("s1", ""),
        }
    }

    #[test]
    fn test_completed_record_derives_overall_score() {
        let table = DimensionTable::from_weights("v1", [("a", 0.5), ("b", 0.5)]).unwrap();
        let scores = table
            .score(&BTreeMap::from([("a".to_string(), 4.0), ("b".to_string(), 3.0)]))
            .unwrap();

        let mut cell = EvaluationCell::pending(&plan());
        assert_eq!(cell.status(), CellStatus::Pending);
        cell.complete(
            NegotiationSession::single_agent(Candidate::new("hint")),
            vec![JudgeScores {
                judge: "j1".into(),
                scores,
            }],
        );

        let record = cell.record(false);
        assert_eq!(record.status, CellStatus::Completed);
        assert_eq!(record.overall_score, Some(70.0));
        assert_eq!(
            record.dimension_scores.as_ref().map(DimensionScores::overall_score),
            Some(70.0)
        );
        assert_eq!(record.outcome, Some(Outcome::Synthesis));
        assert!(record.accepted_as_is);
        assert!(record.session.is_none());
        assert_eq!(record.levels["recognition"], "off");
    }

    #[test]
    fn test_cancelled_record_has_no_scores() {
        let mut cell = EvaluationCell::pending(&plan());
        cell.fail(None, CellFailure::cancelled());

        let record = cell.record(true);
        assert_eq!(record.status, CellStatus::Failed);
        assert_eq!(record.overall_score, None);
        assert_eq!(record.outcome, None);
        assert_eq!(record.failure.unwrap().kind, FailureKind::Cancelled);
    }
}

//! Capabilities backed by external agent processes.
//!
//! Each adapter serializes one JSON request (tagged with a `role` field) to
//! the agent's stdin and parses its stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use tutorloops_agent::{Agent, AgentConfig, AgentError};
use tutorloops_critic::{
    Assessment, CriticEvaluationInput, CriticEvaluator, EvaluationError, HistoryEntry,
};

use crate::capability::{
    Candidate, CapabilityError, Critic, Judge, PriorCritique, ProposalContext, Proposer,
    Transcript,
};
use crate::design::Architecture;
use crate::round::DialogueRound;

fn agent_error(e: AgentError) -> CapabilityError {
    match e {
        AgentError::Timeout(d) => CapabilityError::Timeout(d),
        AgentError::Output(reason) => CapabilityError::Malformed(reason),
        other => CapabilityError::Transport(other.to_string()),
    }
}

async fn call_agent<T: Serialize>(
    agent: &dyn Agent,
    config: &AgentConfig,
    request: &T,
) -> Result<String, CapabilityError> {
    let input = serde_json::to_string(request)
        .map_err(|e| CapabilityError::Malformed(format!("request encoding: {}", e)))?;
    let output = agent.execute(&input, config).await.map_err(agent_error)?;
    if !output.success() {
        return Err(CapabilityError::Transport(format!(
            "{} exited with code {}: {}",
            agent.name(),
            output.exit_code,
            output.stderr_tail()
        )));
    }
    Ok(output.stdout)
}

/// The outermost `{...}` span, so prose around a JSON answer is tolerated.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

#[derive(Serialize)]
struct PriorRequest<'a> {
    candidate: &'a str,
    assessment: &'a Assessment,
}

#[derive(Serialize)]
struct ProposerRequest<'a> {
    role: &'static str,
    profile: &'a str,
    levels: &'a BTreeMap<String, String>,
    architecture: Architecture,
    scenario: &'a str,
    context: &'a str,
    replication: usize,
    round: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    prior: Option<PriorRequest<'a>>,
}

#[derive(Deserialize)]
struct ProposerReply {
    content: String,
}

pub struct AgentProposer {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
}

impl AgentProposer {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self { agent, config }
    }

    /// `{"content": ...}` or the raw text of stdout.
    pub fn parse_reply(stdout: &str) -> Result<Candidate, CapabilityError> {
        let trimmed = stdout.trim();
        let content = match serde_json::from_str::<ProposerReply>(trimmed) {
            Ok(reply) => reply.content,
            Err(_) => trimmed.to_string(),
        };
        if content.trim().is_empty() {
            return Err(CapabilityError::Malformed("empty proposal".into()));
        }
        Ok(Candidate::new(content))
    }
}

#[async_trait]
impl Proposer for AgentProposer {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn propose(
        &self,
        context: &ProposalContext<'_>,
        prior: Option<PriorCritique<'_>>,
    ) -> Result<Candidate, CapabilityError> {
        let request = ProposerRequest {
            role: "proposer",
            profile: &context.profile.name,
            levels: &context.profile.levels,
            architecture: context.profile.architecture,
            scenario: &context.scenario.id,
            context: &context.scenario.context,
            replication: context.replication,
            round: context.round,
            prior: prior.map(|p| PriorRequest {
                candidate: &p.candidate.content,
                assessment: p.assessment,
            }),
        };
        let stdout = call_agent(self.agent.as_ref(), &self.config, &request).await?;
        debug!(round = context.round, bytes = stdout.len(), "Proposer replied");
        Self::parse_reply(&stdout)
    }
}

pub struct AgentCritic {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
}

impl AgentCritic {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self { agent, config }
    }
}

#[async_trait]
impl Critic for AgentCritic {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn critique(
        &self,
        context: &ProposalContext<'_>,
        candidate: &Candidate,
        history: &[DialogueRound],
    ) -> Result<Assessment, CapabilityError> {
        let entries: Vec<HistoryEntry<'_>> = history
            .iter()
            .filter_map(|round| {
                round.critique().map(|assessment| HistoryEntry {
                    round: round.index(),
                    proposal: &round.proposal().content,
                    assessment,
                })
            })
            .collect();
        let input = CriticEvaluationInput {
            profile: &context.profile.name,
            scenario: &context.scenario.id,
            context: &context.scenario.context,
            round: context.round,
            candidate: &candidate.content,
            history: &entries,
        };

        CriticEvaluator::new(self.agent.as_ref())
            .evaluate(input, &self.config)
            .await
            .map_err(|e| match e {
                EvaluationError::Agent(inner) => agent_error(inner),
                EvaluationError::ExitStatus { .. } => CapabilityError::Transport(e.to_string()),
                EvaluationError::RequestEncoding(_) | EvaluationError::ParseError(_) => {
                    CapabilityError::Malformed(e.to_string())
                }
            })
    }
}

#[derive(Serialize)]
struct JudgeRequest<'a> {
    role: &'static str,
    #[serde(flatten)]
    transcript: &'a Transcript,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JudgeReply {
    Wrapped { scores: BTreeMap<String, f64> },
    Bare(BTreeMap<String, f64>),
}

pub struct AgentJudge {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
}

impl AgentJudge {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self { agent, config }
    }

    /// `{"scores": {...}}` or a bare `{dimension: value}` map.
    pub fn parse_reply(stdout: &str) -> Result<BTreeMap<String, f64>, CapabilityError> {
        let span = json_span(stdout)
            .ok_or_else(|| CapabilityError::Malformed("no JSON object in judge output".into()))?;
        match serde_json::from_str::<JudgeReply>(span) {
            Ok(JudgeReply::Wrapped { scores }) | Ok(JudgeReply::Bare(scores)) => Ok(scores),
            Err(e) => Err(CapabilityError::Malformed(format!("judge scores: {}", e))),
        }
    }
}

#[async_trait]
impl Judge for AgentJudge {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn score(
        &self,
        transcript: &Transcript,
    ) -> Result<BTreeMap<String, f64>, CapabilityError> {
        let request = JudgeRequest {
            role: "judge",
            transcript,
        };
        let stdout = call_agent(self.agent.as_ref(), &self.config, &request).await?;
        Self::parse_reply(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Profile, Scenario};
    use std::sync::Mutex;
    use std::time::Duration;
    use tutorloops_agent::AgentOutput;

    struct Scripted {
        reply: Result<(&'static str, i32), Duration>,
        seen: Mutex<Vec<serde_json::Value>>,
    }

    impl Scripted {
        fn answering(stdout: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok((stdout, 0)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Agent for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            input: &str,
            _config: &AgentConfig,
        ) -> Result<AgentOutput, AgentError> {
            self.seen
                .lock()
                .unwrap()
                .push(serde_json::from_str(input).unwrap());
            match self.reply {
                Ok((stdout, code)) => Ok(AgentOutput::new(
                    stdout.to_string(),
                    "rate limited".to_string(),
                    code,
                    Duration::from_millis(1),
                )),
                Err(d) => Err(AgentError::Timeout(d)),
            }
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn fixture() -> (Profile, Scenario) {
        (
            Profile {
                name: "on_multi".into(),
                levels: BTreeMap::from([("recognition".to_string(), "on".to_string())]),
                architecture: Architecture::MultiAgent,
            },
            Scenario::new("returning_learner", "Back after a week away"),
        )
    }

    #[tokio::test]
    async fn test_proposer_sends_prior_critique() {
        let agent = Scripted::answering(r#"{"content": "Pick up where you left off"}"#);
        let proposer = AgentProposer::new(agent.clone(), AgentConfig::default());
        let (profile, scenario) = fixture();
        let context = ProposalContext {
            profile: &profile,
            scenario: &scenario,
            replication: 0,
            round: 1,
        };
        let previous = Candidate::new("Start from scratch");
        let assessment = Assessment::reject(0.8, vec!["ignores history".into()]);

        let candidate = proposer
            .propose(
                &context,
                Some(PriorCritique {
                    candidate: &previous,
                    assessment: &assessment,
                }),
            )
            .await
            .unwrap();

        assert_eq!(candidate.content, "Pick up where you left off");
        let seen = agent.seen.lock().unwrap();
        assert_eq!(seen[0]["role"], "proposer");
        assert_eq!(seen[0]["round"], 1);
        assert_eq!(seen[0]["prior"]["candidate"], "Start from scratch");
        assert_eq!(seen[0]["levels"]["recognition"], "on");
    }

    #[test]
    fn test_proposer_reply_forms() {
        assert_eq!(
            AgentProposer::parse_reply("  plain suggestion \n").unwrap(),
            Candidate::new("plain suggestion")
        );
        assert!(matches!(
            AgentProposer::parse_reply("   "),
            Err(CapabilityError::Malformed(_))
        ));
        assert!(matches!(
            AgentProposer::parse_reply(r#"{"content": ""}"#),
            Err(CapabilityError::Malformed(_))
        ));
    }

    #[test]
    fn test_judge_reply_forms() {
        let wrapped = AgentJudge::parse_reply(r#"Scores: {"scores": {"tone": 4, "relevance": 3.5}}"#)
            .unwrap();
        assert_eq!(wrapped["relevance"], 3.5);

        let bare = AgentJudge::parse_reply(r#"{"tone": 2}"#).unwrap();
        assert_eq!(bare["tone"], 2.0);

        assert!(AgentJudge::parse_reply("no idea").is_err());
        assert!(AgentJudge::parse_reply(r#"{"tone": "good"}"#).is_err());
    }

    #[tokio::test]
    async fn test_agent_failures_map_to_failure_kinds() {
        let (profile, scenario) = fixture();
        let context = ProposalContext {
            profile: &profile,
            scenario: &scenario,
            replication: 0,
            round: 0,
        };

        let slow = Arc::new(Scripted {
            reply: Err(Duration::from_secs(3)),
            seen: Mutex::new(Vec::new()),
        });
        let err = AgentProposer::new(slow, AgentConfig::default())
            .propose(&context, None)
            .await
            .unwrap_err();
        assert_eq!(err, CapabilityError::Timeout(Duration::from_secs(3)));

        let crashed = Arc::new(Scripted {
            reply: Ok(("", 1)),
            seen: Mutex::new(Vec::new()),
        });
        let err = AgentCritic::new(crashed, AgentConfig::default())
            .critique(&context, &Candidate::new("x"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Transport(_)));

        let rambling = Scripted::answering("I think it is fine overall.");
        let err = AgentCritic::new(rambling, AgentConfig::default())
            .critique(&context, &Candidate::new("x"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }
}

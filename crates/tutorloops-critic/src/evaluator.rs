use serde::Serialize;
use tracing::{debug, info};
use tutorloops_agent::{Agent, AgentConfig};

use crate::{Assessment, AssessmentParseError};

/// One closed round shown to the critic as history.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistoryEntry<'a> {
    pub round: usize,
    pub proposal: &'a str,
    pub assessment: &'a Assessment,
}

/// Inputs required to evaluate a candidate. Serialized as the request the
/// critic process receives on stdin.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CriticEvaluationInput<'a> {
    pub profile: &'a str,
    pub scenario: &'a str,
    pub context: &'a str,
    pub round: usize,
    pub candidate: &'a str,
    pub history: &'a [HistoryEntry<'a>],
}

#[derive(Serialize)]
struct CriticRequest<'a> {
    role: &'static str,
    #[serde(flatten)]
    input: CriticEvaluationInput<'a>,
}

/// Evaluator that runs the critic agent
pub struct CriticEvaluator<'a> {
    agent: &'a dyn Agent,
}

impl<'a> CriticEvaluator<'a> {
    pub fn new(agent: &'a dyn Agent) -> Self {
        Self { agent }
    }

    /// Evaluate the proposer's candidate
    pub async fn evaluate(
        &self,
        input: CriticEvaluationInput<'_>,
        config: &AgentConfig,
    ) -> Result<Assessment, EvaluationError> {
        let request = serde_json::to_string(&CriticRequest {
            role: "critic",
            input,
        })
        .map_err(|e| EvaluationError::RequestEncoding(e.to_string()))?;

        debug!(
            request_len = request.len(),
            round = input.round,
            "Running critic evaluation"
        );

        let output = self
            .agent
            .execute(&request, config)
            .await
            .map_err(EvaluationError::Agent)?;

        info!(
            exit_code = output.exit_code,
            duration_secs = output.duration.as_secs_f64(),
            "Critic completed"
        );

        if !output.success() {
            return Err(EvaluationError::ExitStatus {
                code: output.exit_code,
                stderr: output.stderr_tail().to_string(),
            });
        }

        Assessment::parse(&output.stdout).map_err(EvaluationError::ParseError)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Agent execution error: {0}")]
    Agent(tutorloops_agent::AgentError),

    #[error("Critic exited with code {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    #[error("Failed to encode critic request: {0}")]
    RequestEncoding(String),

    #[error("Failed to parse critic assessment: {0}")]
    ParseError(#[from] AssessmentParseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tutorloops_agent::{AgentError, AgentOutput};

    struct CannedAgent {
        stdout: &'static str,
        exit_code: i32,
        last_input: Mutex<String>,
    }

    #[async_trait]
    impl Agent for CannedAgent {
        fn name(&self) -> &str {
            "canned"
        }

        async fn execute(
            &self,
            input: &str,
            _config: &AgentConfig,
        ) -> Result<AgentOutput, AgentError> {
            *self.last_input.lock().unwrap() = input.to_string();
            Ok(AgentOutput::new(
                self.stdout.to_string(),
                "upstream overloaded".to_string(),
                self.exit_code,
                Duration::from_millis(1),
            ))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn input<'a>(history: &'a [HistoryEntry<'a>]) -> CriticEvaluationInput<'a> {
        CriticEvaluationInput {
            profile: "recognition_multi",
            scenario: "spiral-metaphor",
            context: "Learner compares dialectics to a spiral",
            round: 1,
            candidate: "Build on the spiral image",
            history,
        }
    }

    #[tokio::test]
    async fn test_evaluate_sends_history_and_parses_assessment() {
        let agent = CannedAgent {
            stdout: r#"<assessment>{"accepted": true, "confidence": 0.9}</assessment>"#,
            exit_code: 0,
            last_input: Mutex::new(String::new()),
        };
        let prior = Assessment::reject(0.8, vec!["too abstract".into()]);
        let history = [HistoryEntry {
            round: 0,
            proposal: "Explain Hegel",
            assessment: &prior,
        }];

        let assessment = CriticEvaluator::new(&agent)
            .evaluate(input(&history), &AgentConfig::default())
            .await
            .unwrap();
        assert!(assessment.accepted);

        let sent: serde_json::Value =
            serde_json::from_str(&agent.last_input.lock().unwrap()).unwrap();
        assert_eq!(sent["role"], "critic");
        assert_eq!(sent["round"], 1);
        assert_eq!(sent["history"][0]["assessment"]["concerns"][0], "too abstract");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_with_stderr() {
        let agent = CannedAgent {
            stdout: "",
            exit_code: 3,
            last_input: Mutex::new(String::new()),
        };
        let result = CriticEvaluator::new(&agent)
            .evaluate(input(&[]), &AgentConfig::default())
            .await;
        match result {
            Err(EvaluationError::ExitStatus { code, stderr }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "upstream overloaded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

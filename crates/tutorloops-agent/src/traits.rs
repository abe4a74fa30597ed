use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::AgentOutput;

/// Variable through which the configured model reaches the agent process
pub const MODEL_ENV: &str = "TUTORLOOPS_MODEL";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Could not start agent process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Agent did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unreadable agent output: {0}")]
    Output(String),
}

/// Per-call settings for one agent invocation
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Inherits the caller's directory when unset
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub model: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl AgentConfig {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir: Some(working_dir),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Variables to set on the process, with the model under [`MODEL_ENV`]
    pub fn environment(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(self.model.as_deref().map(|m| (MODEL_ENV, m)))
    }
}

/// A generative model reachable through one request/reply exchange.
///
/// The request is a JSON document; whether it asks for a proposal, a
/// critique or a judgement is up to the caller.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &str, config: &AgentConfig) -> Result<AgentOutput, AgentError>;

    async fn is_available(&self) -> bool;
}

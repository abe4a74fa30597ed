//! Experiment configuration file support.
//!
//! Loads the run definition from `tutorloops.toml`.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use tutorloops_agent::{Agent, AgentConfig, CommandAgent};
use tutorloops_core::adapters::{AgentCritic, AgentJudge, AgentProposer};
use tutorloops_core::{
    Capabilities, ChangeDetector, CompromisePolicy, Critic, DesignError, DimensionTable,
    EngineConfig, ExactChange, ExperimentDesign, Factor, Judge, NegotiationError, RetryPolicy,
    RunConfig, Scenario, TokenOverlapChange,
};

/// The config file name
pub const CONFIG_FILE_NAME: &str = "tutorloops.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid engine settings: {0}")]
    Engine(#[from] NegotiationError),

    #[error("Invalid design: {0}")]
    Design(#[from] DesignError),

    #[error("{0}")]
    Invalid(String),
}

/// A complete experiment loaded from `tutorloops.toml`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub run: RunSection,
    /// Validated while parsing
    pub rubric: DimensionTable,
    #[serde(default)]
    pub factors: Vec<Factor>,
    pub scenarios: Vec<Scenario>,
    #[serde(default = "default_replications")]
    pub replications: usize,
    pub agents: AgentsSection,
    /// Raw file contents, hashed into the results file name
    #[serde(skip)]
    pub source: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetectorKind {
    #[default]
    Exact,
    TokenOverlap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub max_rounds: usize,
    pub approval_threshold: f64,
    pub compromise_policy: CompromisePolicy,
    pub change_detector: ChangeDetectorKind,
    /// Word-set similarity below which a revision counts as a material change
    pub similarity_threshold: f64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            max_rounds: engine.max_rounds,
            approval_threshold: engine.approval_threshold,
            compromise_policy: engine.compromise_policy,
            change_detector: ChangeDetectorKind::default(),
            similarity_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub parallelism: usize,
    pub retry_limit: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    pub keep_sessions: bool,
    /// Directory for results files (default: the user data directory)
    pub output_dir: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        let run = RunConfig::default();
        Self {
            parallelism: run.parallelism,
            retry_limit: run.retry.retry_limit,
            retry_backoff: run.retry.backoff,
            call_timeout: run.retry.call_timeout,
            keep_sessions: run.keep_sessions,
            output_dir: None,
        }
    }
}

/// An external command speaking the JSON request protocol on stdin
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    /// Display name; defaults to `command` (plus `:model` when set)
    pub name: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl AgentSpec {
    pub fn display_name(&self) -> String {
        match (&self.name, &self.model) {
            (Some(name), _) => name.clone(),
            (None, Some(model)) => format!("{}:{}", self.command, model),
            (None, None) => self.command.clone(),
        }
    }

    fn agent(&self) -> Arc<dyn Agent> {
        Arc::new(
            CommandAgent::new(self.display_name(), &self.command).with_args(self.args.clone()),
        )
    }

    fn agent_config(&self, working_dir: &Path, timeout: Duration) -> AgentConfig {
        let mut config = AgentConfig::new(working_dir.to_path_buf()).with_timeout(timeout);
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        for (key, value) in &self.env {
            config = config.with_env(key.clone(), value.clone());
        }
        config
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentsSection {
    pub proposer: AgentSpec,
    pub critic: Option<AgentSpec>,
    /// The first judge is primary
    #[serde(default)]
    pub judges: Vec<AgentSpec>,
}

fn default_replications() -> usize {
    1
}

impl ExperimentConfig {
    /// Load and validate configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: ExperimentConfig =
            toml::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::from(CONFIG_FILE_NAME),
                source,
            })?;
        config.source = content.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Checks that span sections. Re-run after applying CLI overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config().validate()?;
        if self.run.parallelism == 0 {
            return Err(ConfigError::Invalid("run.parallelism must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.engine.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "engine.similarity_threshold {} is outside [0, 1]",
                self.engine.similarity_threshold
            )));
        }
        if self.agents.judges.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[agents.judges]] entry is required".into(),
            ));
        }

        let mut names = BTreeSet::new();
        for judge in &self.agents.judges {
            let name = judge.display_name();
            if !names.insert(name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "judge name '{}' is used twice; set `name` to tell them apart",
                    name
                )));
            }
        }

        self.design()?.cells(self.agents.critic.is_some())?;
        Ok(())
    }

    pub fn design(&self) -> Result<ExperimentDesign, DesignError> {
        ExperimentDesign::new(
            self.factors.clone(),
            self.scenarios.clone(),
            self.replications,
        )
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_rounds: self.engine.max_rounds,
            approval_threshold: self.engine.approval_threshold,
            compromise_policy: self.engine.compromise_policy,
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            engine: self.engine_config(),
            parallelism: self.run.parallelism,
            retry: RetryPolicy {
                retry_limit: self.run.retry_limit,
                backoff: self.run.retry_backoff,
                call_timeout: self.run.call_timeout,
            },
            keep_sessions: self.run.keep_sessions,
        }
    }

    pub fn change_detector(&self) -> Arc<dyn ChangeDetector> {
        match self.engine.change_detector {
            ChangeDetectorKind::Exact => Arc::new(ExactChange),
            ChangeDetectorKind::TokenOverlap => {
                Arc::new(TokenOverlapChange::new(self.engine.similarity_threshold))
            }
        }
    }

    /// Every configured agent, proposer first.
    pub fn agent_specs(&self) -> impl Iterator<Item = &AgentSpec> {
        std::iter::once(&self.agents.proposer)
            .chain(self.agents.critic.iter())
            .chain(self.agents.judges.iter())
    }

    /// Command-backed capabilities running in `working_dir`.
    pub fn capabilities(&self, working_dir: &Path) -> Capabilities {
        let timeout = self.run.call_timeout;
        let proposer = &self.agents.proposer;
        Capabilities {
            proposer: Arc::new(AgentProposer::new(
                proposer.agent(),
                proposer.agent_config(working_dir, timeout),
            )),
            critic: self.agents.critic.as_ref().map(|spec| {
                Arc::new(AgentCritic::new(
                    spec.agent(),
                    spec.agent_config(working_dir, timeout),
                )) as Arc<dyn Critic>
            }),
            judges: self
                .agents
                .judges
                .iter()
                .map(|spec| {
                    Arc::new(AgentJudge::new(
                        spec.agent(),
                        spec.agent_config(working_dir, timeout),
                    )) as Arc<dyn Judge>
                })
                .collect(),
            change_detector: self.change_detector(),
        }
    }
}

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::{Agent, AgentConfig, AgentError, AgentOutput, ProcessSpawner};

/// Agent backed by an arbitrary command line (a model wrapper script, an
/// API client, a local inference server CLI).
pub struct CommandAgent {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandAgent {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        // Bare names are resolved through PATH by the spawn itself
        if self.program.components().count() > 1 {
            return self.program.is_file();
        }
        Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .is_ok()
    }

    async fn execute(&self, request: &str, config: &AgentConfig) -> Result<AgentOutput, AgentError> {
        ProcessSpawner::spawn(&self.program, &self.args, request, config).await
    }
}

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::{AgentConfig, AgentError, AgentOutput};

/// Runs one request through a child process.
pub struct ProcessSpawner;

impl ProcessSpawner {
    /// Write `request` to the child's stdin and collect everything it prints.
    ///
    /// An expired `config.timeout` drops the child, which kills it.
    pub async fn spawn(
        program: &Path,
        args: &[String],
        request: &str,
        config: &AgentConfig,
    ) -> Result<AgentOutput, AgentError> {
        let started = Instant::now();

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(config.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        debug!(
            program = %program.display(),
            request_bytes = request.len(),
            "Spawning agent process"
        );
        let mut child = command.spawn()?;

        // Written from its own task so a child that replies before draining
        // stdin cannot stall on a full pipe
        if let Some(mut stdin) = child.stdin.take() {
            let request = request.to_owned();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(request.as_bytes()).await {
                    trace!(error = %e, "Agent closed stdin early");
                }
            });
        }

        let collected = child.wait_with_output();
        let output = match config.timeout {
            Some(limit) => tokio::time::timeout(limit, collected)
                .await
                .map_err(|_| AgentError::Timeout(limit))??,
            None => collected.await?,
        };

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| AgentError::Output(format!("stdout is not UTF-8: {}", e)))?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        let duration = started.elapsed();

        debug!(
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "Agent process finished"
        );
        Ok(AgentOutput::new(stdout, stderr, exit_code, duration))
    }
}

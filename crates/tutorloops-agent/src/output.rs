use std::time::Duration;

/// What an agent process left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process was killed by a signal
    pub exit_code: i32,
    pub duration: Duration,
}

impl AgentOutput {
    pub fn new(stdout: String, stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            duration,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, used as a failure reason
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_skips_blank_lines() {
        let output = AgentOutput::new(
            String::new(),
            "warming up\nrate limited  \n\n".to_string(),
            1,
            Duration::from_millis(5),
        );
        assert!(!output.success());
        assert_eq!(output.stderr_tail(), "rate limited");
    }

    #[test]
    fn test_empty_stderr_has_empty_tail() {
        let output = AgentOutput::new("{}".into(), String::new(), 0, Duration::ZERO);
        assert!(output.success());
        assert_eq!(output.stderr_tail(), "");
    }
}

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Which capability an adapter call served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterRole {
    Proposer,
    Critic,
    Judge,
}

impl std::fmt::Display for AdapterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterRole::Proposer => write!(f, "proposer"),
            AdapterRole::Critic => write!(f, "critic"),
            AdapterRole::Judge => write!(f, "judge"),
        }
    }
}

/// Structured log events for an evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        run_id: String,
        cells: usize,
        parallelism: usize,
        max_rounds: usize,
    },
    CellStarted {
        cell: String,
        architecture: String,
    },
    RoundDrafted {
        cell: String,
        round: usize,
    },
    CritiqueAttached {
        cell: String,
        round: usize,
        accepted: bool,
        confidence: f64,
        concerns: usize,
    },
    SessionTerminated {
        cell: String,
        outcome: String,
        rounds: usize,
    },
    AdapterRetry {
        cell: String,
        role: AdapterRole,
        attempt: u32,
        error: String,
    },
    CellCompleted {
        cell: String,
        outcome: String,
        overall_score: f64,
    },
    CellFailed {
        cell: String,
        kind: String,
        reason: String,
    },
    RunInterrupted {
        remaining: usize,
    },
    RunCompleted {
        completed: usize,
        failed: usize,
        duration_secs: f64,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for run events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    quiet: bool,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            quiet: false,
            file_writer: None,
        }
    }

    /// A logger that writes nothing to the console (tests, library use)
    pub fn silent() -> Self {
        Self {
            format: LogFormat::Compact,
            quiet: true,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            quiet: false,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        if self.quiet {
            return;
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::RunStarted {
                run_id,
                cells,
                parallelism,
                max_rounds,
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{}",
                    "╭─────────────────────────────────────────────────────────────────────╮"
                        .bright_blue()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "tutorloops".bold().bright_white(),
                    run_id.dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}  {} {}  {} {}",
                    "│".bright_blue(),
                    "Cells:".dimmed(),
                    cells,
                    "Parallelism:".dimmed(),
                    parallelism,
                    "Max rounds:".dimmed(),
                    max_rounds
                );
                let _ = writeln!(
                    stderr,
                    "{}",
                    "╰─────────────────────────────────────────────────────────────────────╯"
                        .bright_blue()
                );
                let _ = writeln!(stderr);
            }
            LogEvent::CellStarted { cell, architecture } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {}",
                    "▶".bright_cyan(),
                    cell.bright_cyan().bold(),
                    format!("({})", architecture).dimmed()
                );
            }
            LogEvent::RoundDrafted { .. } | LogEvent::CritiqueAttached { .. } => {
                // Per-round detail is only useful in json/compact output
            }
            LogEvent::SessionTerminated {
                cell,
                outcome,
                rounds,
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} after {} round(s) {}",
                    "→".bright_yellow(),
                    outcome.bright_yellow(),
                    rounds,
                    cell.dimmed()
                );
            }
            LogEvent::AdapterRetry {
                cell,
                role,
                attempt,
                error,
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} retry {} for {}: {}",
                    "↻".yellow(),
                    role,
                    attempt,
                    cell.dimmed(),
                    error.dimmed()
                );
            }
            LogEvent::CellCompleted {
                cell,
                outcome,
                overall_score,
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} {} ({})",
                    "✓".bright_green(),
                    cell,
                    format!("{:.1}", overall_score).bright_green().bold(),
                    outcome
                );
            }
            LogEvent::CellFailed { cell, kind, reason } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} [{}] {}",
                    "✗".bright_red(),
                    cell,
                    kind.bright_red(),
                    reason.dimmed()
                );
            }
            LogEvent::RunInterrupted { remaining } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} Run interrupted, {} cell(s) not started",
                    "⚠".bright_yellow(),
                    remaining
                );
            }
            LogEvent::RunCompleted { .. } => {
                // The final summary is printed by the binary
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::RunStarted { run_id, cells, .. } => {
                format!("[{}] run:start {} cells={}", timestamp, run_id, cells)
            }
            LogEvent::CellStarted { cell, .. } => format!("[{}] cell:start {}", timestamp, cell),
            LogEvent::RoundDrafted { cell, round } => {
                format!("[{}] propose:{} {}", timestamp, round, cell)
            }
            LogEvent::CritiqueAttached {
                cell,
                round,
                accepted,
                confidence,
                concerns,
            } => format!(
                "[{}] critique:{} {} accepted={} conf={:.2} concerns={}",
                timestamp, round, cell, accepted, confidence, concerns
            ),
            LogEvent::SessionTerminated {
                cell,
                outcome,
                rounds,
            } => format!("[{}] session:{} {} rounds={}", timestamp, outcome, cell, rounds),
            LogEvent::AdapterRetry {
                cell,
                role,
                attempt,
                error,
            } => format!(
                "[{}] retry:{}:{} {} {}",
                timestamp, role, attempt, cell, error
            ),
            LogEvent::CellCompleted {
                cell,
                overall_score,
                ..
            } => format!("[{}] cell:done {} {:.1}", timestamp, cell, overall_score),
            LogEvent::CellFailed { cell, kind, .. } => {
                format!("[{}] cell:failed:{} {}", timestamp, kind, cell)
            }
            LogEvent::RunInterrupted { remaining } => {
                format!("[{}] run:interrupted remaining={}", timestamp, remaining)
            }
            LogEvent::RunCompleted {
                completed,
                failed,
                duration_secs,
            } => format!(
                "[{}] run:done completed={} failed={} {:.1}s",
                timestamp, completed, failed, duration_secs
            ),
        };
        let _ = writeln!(stderr, "{}", msg);
    }
}

//! Reading a results file back for offline statistics.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use tutorloops_core::{CellRecord, DimensionTable, ExperimentDesign, Factor};

/// Contents of one `*.jsonl` run file
#[derive(Debug, Default)]
pub struct RunFile {
    pub run_id: Option<String>,
    pub rubric: Option<DimensionTable>,
    /// Declared factors, in declaration order
    pub factors: Vec<Factor>,
    pub records: Vec<CellRecord>,
    /// False when the run never wrote its `run_end` line
    pub finished: bool,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut file = RunFile::default();

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("line {} is not JSON", line_no))?;

            match value.get("type").and_then(Value::as_str) {
                Some("run_start") => {
                    file.run_id = value
                        .get("run_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    if let Some(rubric) = value.get("rubric") {
                        file.rubric = Some(
                            serde_json::from_value(rubric.clone())
                                .with_context(|| format!("line {}: invalid rubric", line_no))?,
                        );
                    }
                    if let Some(design) = value.get("design") {
                        let design: ExperimentDesign = serde_json::from_value(design.clone())
                            .with_context(|| format!("line {}: invalid design", line_no))?;
                        file.factors = design.factors().to_vec();
                    }
                }
                Some("cell") => {
                    let record: CellRecord = serde_json::from_value(value)
                        .with_context(|| format!("line {}: invalid cell record", line_no))?;
                    file.records.push(record);
                }
                Some("run_end") => file.finished = true,
                Some(other) => debug!(line = line_no, kind = other, "skipping unknown line type"),
                None => bail!("line {} has no type", line_no),
            }
        }

        file.records.sort_by_key(CellRecord::key);
        Ok(file)
    }
}

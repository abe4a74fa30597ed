use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Writes one experiment run as JSONL: a `run_start` line, one `cell` line
/// per finished cell, and a `run_end` line.
///
/// Payloads are passed as `Serialize` values so this crate stays independent
/// of the evaluation types.
pub struct RunWriter {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RunWriter {
    /// Create a run file under ~/.local/share/tutorloops/runs/, named from the
    /// current UTC timestamp and a hash of the run configuration.
    pub fn in_data_dir(config_text: &str) -> io::Result<Self> {
        let runs_dir = Self::runs_dir()?;
        Self::in_dir(&runs_dir, config_text)
    }

    /// Same naming scheme as [`RunWriter::in_data_dir`] in an explicit directory.
    pub fn in_dir(dir: &Path, config_text: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let timestamp_str = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
        let filename = format!("{}_{}.jsonl", timestamp_str, short_hash(config_text));
        Self::create(&dir.join(filename))
    }

    /// Create (truncating) a run file at an explicit path.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;

        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Returns the path to the run file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_start<T: Serialize>(&self, run_id: &str, metadata: &T) {
        let mut fields = Map::new();
        fields.insert("run_id".into(), Value::String(run_id.to_string()));
        fields.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        self.write_line("run_start", fields, metadata);
    }

    pub fn write_cell<T: Serialize>(&self, record: &T) {
        self.write_line("cell", Map::new(), record);
    }

    pub fn write_end<T: Serialize>(&self, summary: &T) {
        let mut fields = Map::new();
        fields.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        self.write_line("run_end", fields, summary);
    }

    fn write_line<T: Serialize>(&self, kind: &str, mut fields: Map<String, Value>, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, kind, "Failed to serialize run line");
                return;
            }
        };
        match payload {
            Value::Object(obj) => fields.extend(obj),
            other => {
                fields.insert("data".into(), other);
            }
        }
        fields.insert("type".into(), Value::String(kind.to_string()));

        if let Ok(json) = serde_json::to_string(&Value::Object(fields)) {
            if let Ok(mut writer) = self.file.lock() {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }

    fn runs_dir() -> io::Result<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine data directory",
            )
        })?;
        Ok(data_dir.join("tutorloops").join("runs"))
    }
}

fn short_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hex::encode(hasher.finalize());
    hash[..6].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_file_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let writer = RunWriter::in_dir(dir.path(), "replications = 3").unwrap();

        writer.write_start("run-1", &json!({"cells": 2}));
        writer.write_cell(&json!({"profile": "base", "status": "completed"}));
        writer.write_end(&json!({"completed": 1}));

        let name = writer.path().file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(&format!("_{}.jsonl", short_hash("replications = 3"))));

        let content = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "run_start");
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[1]["type"], "cell");
        assert_eq!(lines[1]["profile"], "base");
        assert_eq!(lines[2]["type"], "run_end");
    }
}

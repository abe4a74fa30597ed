use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// How the critic intervened on the proposer's candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionType {
    /// Candidate passes as written
    Accept,
    /// Candidate needs targeted changes
    Modify,
    /// Candidate should be replaced
    Reject,
}

impl std::fmt::Display for InterventionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterventionType::Accept => write!(f, "accept"),
            InterventionType::Modify => write!(f, "modify"),
            InterventionType::Reject => write!(f, "reject"),
        }
    }
}

/// The critic's structured verdict on one candidate.
///
/// Any unstructured judgement the critic makes is flattened into
/// `confidence`; the negotiation engine only acts on these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub accepted: bool,
    /// Confidence in the verdict (0.0 - 1.0)
    pub confidence: f64,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub intervention: InterventionType,
}

/// Shape accepted on the wire; `intervention` may be omitted.
#[derive(Deserialize)]
struct RawAssessment {
    accepted: bool,
    confidence: f64,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    intervention: Option<InterventionType>,
}

#[derive(Error, Debug)]
pub enum AssessmentParseError {
    #[error("No assessment found in critic output")]
    NoAssessmentFound,

    #[error("Ambiguous assessment: accepted={accepted} with intervention {intervention}")]
    AmbiguousVerdict {
        accepted: bool,
        intervention: InterventionType,
    },

    #[error("Failed to parse assessment JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid assessment format: {0}")]
    InvalidFormat(String),
}

impl Assessment {
    pub fn accept(confidence: f64) -> Self {
        Self {
            accepted: true,
            confidence,
            concerns: Vec::new(),
            intervention: InterventionType::Accept,
        }
    }

    pub fn reject(confidence: f64, concerns: Vec<String>) -> Self {
        Self {
            accepted: false,
            confidence,
            concerns,
            intervention: InterventionType::Reject,
        }
    }

    pub fn with_intervention(mut self, intervention: InterventionType) -> Self {
        self.intervention = intervention;
        self
    }

    /// Parse an assessment from the critic's output text
    ///
    /// Expected format in critic output:
    /// ```text
    /// <assessment>
    /// {"accepted": false, "confidence": 0.8, "concerns": ["..."], "intervention": "modify"}
    /// </assessment>
    /// ```
    /// A bare JSON object as the whole output is accepted too.
    pub fn parse(critic_output: &str) -> Result<Self, AssessmentParseError> {
        debug!(output_len = critic_output.len(), "Parsing critic assessment");

        let raw: RawAssessment = match Self::find_block(critic_output)? {
            Some(block) => serde_json::from_str(block)?,
            None => {
                let trimmed = critic_output.trim();
                if !trimmed.starts_with('{') {
                    return Err(AssessmentParseError::NoAssessmentFound);
                }
                serde_json::from_str(trimmed)?
            }
        };

        Self::from_raw(raw)
    }

    fn find_block(output: &str) -> Result<Option<&str>, AssessmentParseError> {
        const OPEN: &str = "<assessment>";
        const CLOSE: &str = "</assessment>";

        match (output.find(OPEN), output.find(CLOSE)) {
            (Some(start), Some(end)) if start < end => Ok(Some(output[start + OPEN.len()..end].trim())),
            (Some(_), Some(_)) | (Some(_), None) => Err(AssessmentParseError::InvalidFormat(
                "Malformed assessment block".to_string(),
            )),
            _ => Ok(None),
        }
    }

    fn from_raw(raw: RawAssessment) -> Result<Self, AssessmentParseError> {
        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(AssessmentParseError::InvalidFormat(format!(
                "confidence {} outside [0, 1]",
                raw.confidence
            )));
        }

        let intervention = match raw.intervention {
            Some(i) => i,
            None if raw.accepted => InterventionType::Accept,
            None => InterventionType::Modify,
        };

        let contradictory = match intervention {
            InterventionType::Accept => !raw.accepted,
            InterventionType::Reject => raw.accepted,
            InterventionType::Modify => false,
        };
        if contradictory {
            return Err(AssessmentParseError::AmbiguousVerdict {
                accepted: raw.accepted,
                intervention,
            });
        }

        Ok(Self {
            accepted: raw.accepted,
            confidence: raw.confidence,
            concerns: raw
                .concerns
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            intervention,
        })
    }
}

use serde::{Deserialize, Serialize};

/// A statistic that may not be computable from the data at hand.
///
/// None of the non-`Computed` variants abort a statistics pass; they are
/// reported next to the terms and groups that did compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Estimate<T> {
    Computed(T),
    /// No completed cells contributed
    NoData,
    /// The statistic is mathematically undefined here (e.g. N < 2)
    Undefined { reason: String },
    /// The design lacks the observations this term needs
    Insufficient { reason: String },
}

impl<T> Estimate<T> {
    pub fn undefined(reason: impl Into<String>) -> Self {
        Estimate::Undefined {
            reason: reason.into(),
        }
    }

    pub fn insufficient(reason: impl Into<String>) -> Self {
        Estimate::Insufficient {
            reason: reason.into(),
        }
    }

    pub fn computed(&self) -> Option<&T> {
        match self {
            Estimate::Computed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Estimate::Computed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Estimate<U> {
        match self {
            Estimate::Computed(value) => Estimate::Computed(f(value)),
            Estimate::NoData => Estimate::NoData,
            Estimate::Undefined { reason } => Estimate::Undefined { reason },
            Estimate::Insufficient { reason } => Estimate::Insufficient { reason },
        }
    }

    /// Short label for the non-computed states
    pub fn status_label(&self) -> &str {
        match self {
            Estimate::Computed(_) => "computed",
            Estimate::NoData => "no data",
            Estimate::Undefined { reason } | Estimate::Insufficient { reason } => reason,
        }
    }
}

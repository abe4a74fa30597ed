use serde::{Deserialize, Serialize};

use tutorloops_critic::Assessment;

use crate::capability::Candidate;
use crate::error::NegotiationError;

/// One proposer/critic exchange.
///
/// Opened when the proposer emits a candidate, closed when the critique is
/// attached; a closed round never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueRound {
    index: usize,
    proposal: Candidate,
    critique: Option<Assessment>,
    /// The proposer resubmitted the previous candidate unchanged
    #[serde(default)]
    unrevised: bool,
}

impl DialogueRound {
    pub(crate) fn open(index: usize, proposal: Candidate, unrevised: bool) -> Self {
        Self {
            index,
            proposal,
            critique: None,
            unrevised,
        }
    }

    pub(crate) fn close(&mut self, critique: Assessment) -> Result<(), NegotiationError> {
        if self.critique.is_some() {
            return Err(NegotiationError::RoundClosed(self.index));
        }
        self.critique = Some(critique);
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn proposal(&self) -> &Candidate {
        &self.proposal
    }

    pub fn critique(&self) -> Option<&Assessment> {
        self.critique.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.critique.is_some()
    }

    pub fn unrevised(&self) -> bool {
        self.unrevised
    }
}

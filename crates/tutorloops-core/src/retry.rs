use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use tutorloops_critic::Assessment;
use tutorloops_logging::{AdapterRole, LogEvent, Logger};

use crate::capability::{
    Candidate, CapabilityError, Critic, PriorCritique, ProposalContext, Proposer,
};
use crate::round::DialogueRound;

/// Retry-with-backoff and per-call timeout for adapter calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retry_limit: u32,
    /// Delay before the first retry, doubled on each further retry
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }

    /// Run `call` until it succeeds or the retry budget is spent.
    ///
    /// A call that outlives `call_timeout` is dropped and counts as a
    /// `Timeout` failure. Every failure kind is retried, malformed output
    /// included; `on_retry` sees each failure that will be retried.
    pub async fn run<T, F, Fut>(
        &self,
        mut call: F,
        mut on_retry: impl FnMut(u32, &CapabilityError),
    ) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let mut retry = 0;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(self.call_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.retry_limit => {
                    retry += 1;
                    on_retry(retry, &e);
                    tokio::time::sleep(self.delay(retry)).await;
                }
                Err(e) => {
                    debug!(error = %e, attempts = retry + 1, "Retry budget spent");
                    return Err(e);
                }
            }
        }
    }
}

fn log_retry(logger: &Logger, cell: &str, role: AdapterRole, attempt: u32, error: &CapabilityError) {
    warn!(cell, %role, attempt, error = %error, "Retrying adapter call");
    logger.log(&LogEvent::AdapterRetry {
        cell: cell.to_string(),
        role,
        attempt,
        error: error.to_string(),
    });
}

/// A proposer that retries the wrapped one and reports drafted rounds.
pub struct RetryingProposer<'a> {
    inner: &'a dyn Proposer,
    policy: &'a RetryPolicy,
    cell: &'a str,
    logger: &'a Logger,
}

impl<'a> RetryingProposer<'a> {
    pub fn new(
        inner: &'a dyn Proposer,
        policy: &'a RetryPolicy,
        cell: &'a str,
        logger: &'a Logger,
    ) -> Self {
        Self {
            inner,
            policy,
            cell,
            logger,
        }
    }
}

#[async_trait]
impl Proposer for RetryingProposer<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn propose(
        &self,
        context: &ProposalContext<'_>,
        prior: Option<PriorCritique<'_>>,
    ) -> Result<Candidate, CapabilityError> {
        let candidate = self
            .policy
            .run(
                || self.inner.propose(context, prior),
                |attempt, e| log_retry(self.logger, self.cell, AdapterRole::Proposer, attempt, e),
            )
            .await?;

        self.logger.log(&LogEvent::RoundDrafted {
            cell: self.cell.to_string(),
            round: context.round,
        });
        Ok(candidate)
    }
}

/// A critic that retries the wrapped one and reports attached critiques.
pub struct RetryingCritic<'a> {
    inner: &'a dyn Critic,
    policy: &'a RetryPolicy,
    cell: &'a str,
    logger: &'a Logger,
}

impl<'a> RetryingCritic<'a> {
    pub fn new(
        inner: &'a dyn Critic,
        policy: &'a RetryPolicy,
        cell: &'a str,
        logger: &'a Logger,
    ) -> Self {
        Self {
            inner,
            policy,
            cell,
            logger,
        }
    }
}

#[async_trait]
impl Critic for RetryingCritic<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn critique(
        &self,
        context: &ProposalContext<'_>,
        candidate: &Candidate,
        history: &[DialogueRound],
    ) -> Result<Assessment, CapabilityError> {
        let assessment = self
            .policy
            .run(
                || self.inner.critique(context, candidate, history),
                |attempt, e| log_retry(self.logger, self.cell, AdapterRole::Critic, attempt, e),
            )
            .await?;

        self.logger.log(&LogEvent::CritiqueAttached {
            cell: self.cell.to_string(),
            round: context.round,
            accepted: assessment.accepted,
            confidence: assessment.confidence,
            concerns: assessment.concerns.len(),
        });
        Ok(assessment)
    }
}

/// Retry logging for judge calls, which are driven by the orchestrator directly.
pub(crate) fn judge_retry_logger<'a>(
    logger: &'a Logger,
    cell: &'a str,
) -> impl FnMut(u32, &CapabilityError) + 'a {
    move |attempt, e| log_retry(logger, cell, AdapterRole::Judge, attempt, e)
}

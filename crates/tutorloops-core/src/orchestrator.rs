use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tutorloops_logging::{AdapterRole, LogEvent, Logger, RunWriter};

use crate::capability::{
    CapabilityError, ChangeDetector, Critic, FailureKind, Judge, ProposalContext, Proposer,
    Transcript,
};
use crate::cell::{CellFailure, FailureStage, JudgeScores};
use crate::design::{Architecture, CellKey, CellPlan, ExperimentDesign};
use crate::dimensions::{DimensionScores, DimensionTable};
use crate::engine::{EngineConfig, NegotiationEngine};
use crate::error::RunError;
use crate::retry::{judge_retry_logger, RetryPolicy, RetryingCritic, RetryingProposer};
use crate::session::{ExhaustionCause, NegotiationSession, Outcome};
use crate::store::ResultsStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub parallelism: usize,
    pub retry: RetryPolicy,
    /// Write full dialogue transcripts into each cell record
    pub keep_sessions: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            parallelism: 4,
            retry: RetryPolicy::default(),
            keep_sessions: true,
        }
    }
}

/// The injected collaborators. `critic` may be absent when every profile
/// is single-agent; the first judge is primary.
#[derive(Clone)]
pub struct Capabilities {
    pub proposer: Arc<dyn Proposer>,
    pub critic: Option<Arc<dyn Critic>>,
    pub judges: Vec<Arc<dyn Judge>>,
    pub change_detector: Arc<dyn ChangeDetector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failed cells that never started because of an interrupt
    pub cancelled: usize,
    pub interrupted: bool,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub outcomes: BTreeMap<Outcome, usize>,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else {
            0
        }
    }
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    design: &'a ExperimentDesign,
    rubric: &'a DimensionTable,
    config: &'a RunConfig,
    judges: Vec<&'a str>,
}

enum CellEnd {
    Completed,
    Failed,
    Cancelled,
}

/// Drives every cell of a design to `completed` or `failed`.
///
/// One orchestrator owns one results store and runs once.
pub struct Orchestrator {
    config: RunConfig,
    rubric: DimensionTable,
    capabilities: Capabilities,
    store: Arc<ResultsStore>,
    logger: Arc<Logger>,
    writer: Option<Arc<RunWriter>>,
    interrupted: Arc<AtomicBool>,
    started: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        rubric: DimensionTable,
        capabilities: Capabilities,
        logger: Arc<Logger>,
    ) -> Result<Self, RunError> {
        config.engine.validate()?;
        if config.parallelism == 0 {
            return Err(RunError::InvalidParallelism);
        }
        if capabilities.judges.is_empty() {
            return Err(RunError::NoJudges);
        }
        Ok(Self {
            config,
            rubric,
            capabilities,
            store: Arc::new(ResultsStore::new()),
            logger,
            writer: None,
            interrupted: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        })
    }

    /// Append each finished cell to a JSONL results file.
    pub fn with_writer(mut self, writer: Arc<RunWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Get a handle to signal interruption
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn store(&self) -> Arc<ResultsStore> {
        self.store.clone()
    }

    pub fn rubric(&self) -> &DimensionTable {
        &self.rubric
    }

    /// Fails with [`RunError::AlreadyRan`] on a second call; earlier results
    /// stay in [`store`](Self::store).
    pub async fn run(&self, design: &ExperimentDesign) -> Result<RunSummary, RunError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyRan);
        }
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let plans = design.cells(self.capabilities.critic.is_some())?;
        for plan in &plans {
            self.store.declare(plan)?;
        }

        info!(run_id = %run_id, cells = plans.len(), "Starting evaluation run");
        self.logger.log(&LogEvent::RunStarted {
            run_id: run_id.clone(),
            cells: plans.len(),
            parallelism: self.config.parallelism,
            max_rounds: self.config.engine.max_rounds,
        });
        if let Some(writer) = &self.writer {
            writer.write_start(
                &run_id,
                &RunMetadata {
                    design,
                    rubric: &self.rubric,
                    config: &self.config,
                    judges: self.capabilities.judges.iter().map(|j| j.name()).collect(),
                },
            );
        }

        let ends: Vec<CellEnd> = stream::iter(plans.iter())
            .map(|plan| self.run_cell(plan))
            .buffer_unordered(self.config.parallelism)
            .collect()
            .await;

        let mut cancelled = ends
            .iter()
            .filter(|e| matches!(e, CellEnd::Cancelled))
            .count();

        // Every cell must be finished once the run is declared done.
        for key in self.store.pending_keys() {
            warn!(cell = %key, "Cell still pending at end of run");
            self.store.fail(&key, None, CellFailure::cancelled())?;
            self.write_record(&key);
            cancelled += 1;
        }

        let interrupted = self.interrupted.load(Ordering::SeqCst);
        if interrupted {
            self.logger.log(&LogEvent::RunInterrupted {
                remaining: cancelled,
            });
        }

        let summary = self.summarize(run_id, cancelled, interrupted, started);
        self.logger.log(&LogEvent::RunCompleted {
            completed: summary.completed,
            failed: summary.failed,
            duration_secs: summary.duration_secs,
        });
        if let Some(writer) = &self.writer {
            writer.write_end(&summary);
        }
        info!(
            completed = summary.completed,
            failed = summary.failed,
            "Evaluation run finished"
        );
        Ok(summary)
    }

    async fn run_cell(&self, plan: &CellPlan) -> CellEnd {
        let key = &plan.key;
        if self.interrupted.load(Ordering::SeqCst) {
            self.finish_failed(key, None, CellFailure::cancelled());
            return CellEnd::Cancelled;
        }

        let cell = key.to_string();
        self.logger.log(&LogEvent::CellStarted {
            cell: cell.clone(),
            architecture: plan.profile.architecture.to_string(),
        });

        let context = ProposalContext {
            profile: &plan.profile,
            scenario: &plan.scenario,
            replication: key.replication,
            round: 0,
        };
        let session = match self.negotiate(plan, context, &cell).await {
            Ok(session) => session,
            Err(failure) => {
                self.finish_failed(key, None, failure);
                return CellEnd::Failed;
            }
        };

        self.logger.log(&LogEvent::SessionTerminated {
            cell: cell.clone(),
            outcome: session
                .outcome()
                .map(|o| o.to_string())
                .unwrap_or_default(),
            rounds: session.rounds().len(),
        });

        if session.final_output().is_none() {
            let failure = match session.exhaustion() {
                Some(ExhaustionCause::AdapterFailure { kind, reason, .. }) => CellFailure {
                    kind: *kind,
                    stage: FailureStage::Negotiation,
                    reason: reason.clone(),
                },
                _ => CellFailure {
                    kind: FailureKind::Malformed,
                    stage: FailureStage::Negotiation,
                    reason: "session produced no proposal".into(),
                },
            };
            self.finish_failed(key, Some(session), failure);
            return CellEnd::Failed;
        }

        let transcript = Transcript {
            profile: plan.profile.name.clone(),
            levels: plan.profile.levels.clone(),
            architecture: plan.profile.architecture,
            scenario: plan.scenario.id.clone(),
            context: plan.scenario.context.clone(),
            rounds: session.rounds().to_vec(),
            outcome: session.outcome(),
            final_output: session.final_output().cloned(),
        };

        let judgements = match self.judge(&transcript, &cell).await {
            Ok(judgements) => judgements,
            Err(e) => {
                let failure = CellFailure {
                    kind: e.kind(),
                    stage: FailureStage::Judging,
                    reason: e.to_string(),
                };
                self.finish_failed(key, Some(session), failure);
                return CellEnd::Failed;
            }
        };

        let outcome = session.outcome();
        let overall = judgements
            .first()
            .map(|j| j.scores.overall_score())
            .unwrap_or_default();
        if let Err(e) = self.store.complete(key, session, judgements) {
            warn!(cell = %key, error = %e, "Failed to record completed cell");
            return CellEnd::Failed;
        }
        self.logger.log(&LogEvent::CellCompleted {
            cell,
            outcome: outcome.map(|o| o.to_string()).unwrap_or_default(),
            overall_score: overall,
        });
        self.write_record(key);
        CellEnd::Completed
    }

    async fn negotiate(
        &self,
        plan: &CellPlan,
        context: ProposalContext<'_>,
        cell: &str,
    ) -> Result<NegotiationSession, CellFailure> {
        let policy = &self.config.retry;
        let proposer =
            RetryingProposer::new(self.capabilities.proposer.as_ref(), policy, cell, &self.logger);

        match (plan.profile.architecture, &self.capabilities.critic) {
            (Architecture::MultiAgent, Some(critic)) => {
                let critic = RetryingCritic::new(critic.as_ref(), policy, cell, &self.logger);
                NegotiationEngine::new(
                    &proposer,
                    &critic,
                    self.capabilities.change_detector.as_ref(),
                    &self.config.engine,
                )
                .negotiate(context)
                .await
                .map_err(|e| {
                    warn!(cell, error = %e, "Negotiation protocol error");
                    CellFailure {
                        kind: FailureKind::Malformed,
                        stage: FailureStage::Negotiation,
                        reason: e.to_string(),
                    }
                })
            }
            _ => {
                debug!(cell, "Single-agent cell, skipping critique");
                Ok(match proposer.propose(&context, None).await {
                    Ok(candidate) => NegotiationSession::single_agent(candidate),
                    Err(e) => NegotiationSession::single_agent_exhausted(ExhaustionCause::adapter(
                        AdapterRole::Proposer,
                        &e,
                    )),
                })
            }
        }
    }

    /// Primary judge failure fails the cell; other judges are best-effort.
    async fn judge(
        &self,
        transcript: &Transcript,
        cell: &str,
    ) -> Result<Vec<JudgeScores>, CapabilityError> {
        let mut judgements = Vec::with_capacity(self.capabilities.judges.len());
        for (i, judge) in self.capabilities.judges.iter().enumerate() {
            match self.judge_once(judge.as_ref(), transcript, cell).await {
                Ok(scores) => judgements.push(JudgeScores {
                    judge: judge.name().to_string(),
                    scores,
                }),
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(cell, judge = judge.name(), error = %e, "Secondary judge failed, skipping");
                }
            }
        }
        Ok(judgements)
    }

    async fn judge_once(
        &self,
        judge: &dyn Judge,
        transcript: &Transcript,
        cell: &str,
    ) -> Result<DimensionScores, CapabilityError> {
        let rubric = &self.rubric;
        self.config
            .retry
            .run(
                || async move {
                    let raw = judge.score(transcript).await?;
                    rubric
                        .score(&raw)
                        .map_err(|e| CapabilityError::Malformed(e.to_string()))
                },
                judge_retry_logger(&self.logger, cell),
            )
            .await
    }

    fn finish_failed(
        &self,
        key: &CellKey,
        session: Option<NegotiationSession>,
        failure: CellFailure,
    ) {
        self.logger.log(&LogEvent::CellFailed {
            cell: key.to_string(),
            kind: failure.kind.to_string(),
            reason: failure.reason.clone(),
        });
        if let Err(e) = self.store.fail(key, session, failure) {
            warn!(cell = %key, error = %e, "Failed to record failed cell");
            return;
        }
        self.write_record(key);
    }

    fn write_record(&self, key: &CellKey) {
        let (Some(writer), Some(cell)) = (&self.writer, self.store.get(key)) else {
            return;
        };
        writer.write_cell(&cell.record(self.config.keep_sessions));
    }

    fn summarize(
        &self,
        run_id: String,
        cancelled: usize,
        interrupted: bool,
        started: Instant,
    ) -> RunSummary {
        let records = self.store.records(false);
        let mut failures_by_kind = BTreeMap::new();
        let mut outcomes = BTreeMap::new();
        for record in &records {
            if let Some(failure) = &record.failure {
                *failures_by_kind.entry(failure.kind).or_insert(0) += 1;
            }
            if let Some(outcome) = record.outcome {
                *outcomes.entry(outcome).or_insert(0) += 1;
            }
        }
        let counts = self.store.counts();
        RunSummary {
            run_id,
            total: records.len(),
            completed: counts.completed,
            failed: counts.failed,
            cancelled,
            interrupted,
            failures_by_kind,
            outcomes,
            duration_secs: started.elapsed().as_secs_f64(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("rubric", &self.rubric.version())
            .field("cells", &self.store.len())
            .finish()
    }
}

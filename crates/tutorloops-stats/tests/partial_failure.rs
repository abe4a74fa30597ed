use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tutorloops_core::{
    Candidate, Capabilities, CapabilityError, Critic, DialogueRound, ExactChange,
    ExperimentDesign, Factor, FailureKind, Judge, Orchestrator, PriorCritique, ProposalContext,
    Proposer, RetryPolicy, RunConfig, Scenario, Transcript,
};
use tutorloops_critic::Assessment;
use tutorloops_logging::Logger;
use tutorloops_stats::{Estimate, StatisticsEngine};

/// Times out on s01, s04 and s07
struct Proposing;

#[async_trait]
impl Proposer for Proposing {
    fn name(&self) -> &str {
        "proposing"
    }

    async fn propose(
        &self,
        context: &ProposalContext<'_>,
        _prior: Option<PriorCritique<'_>>,
    ) -> Result<Candidate, CapabilityError> {
        if ["s01", "s04", "s07"].contains(&context.scenario.id.as_str()) {
            return Err(CapabilityError::Timeout(Duration::from_secs(1)));
        }
        Ok(Candidate::new(format!("hint for {}", context.scenario.id)))
    }
}

struct Accepting;

#[async_trait]
impl Critic for Accepting {
    fn name(&self) -> &str {
        "accepting"
    }

    async fn critique(
        &self,
        _context: &ProposalContext<'_>,
        _candidate: &Candidate,
        _history: &[DialogueRound],
    ) -> Result<Assessment, CapabilityError> {
        Ok(Assessment::accept(0.95))
    }
}

/// Scores from the recognition level and the scenario number
struct Scoring;

#[async_trait]
impl Judge for Scoring {
    fn name(&self) -> &str {
        "scoring"
    }

    async fn score(&self, transcript: &Transcript) -> Result<BTreeMap<String, f64>, CapabilityError> {
        let base = if transcript.levels.get("recognition").map(String::as_str) == Some("on") {
            4.0
        } else {
            3.0
        };
        let jitter = transcript.scenario[1..].parse::<f64>().unwrap_or(0.0) % 3.0 * 0.25;
        Ok(BTreeMap::from([
            ("relevance".to_string(), base + jitter),
            ("tone".to_string(), base),
        ]))
    }
}

fn scenarios() -> Vec<Scenario> {
    (0..10)
        .map(|i| Scenario::new(format!("s{:02}", i), ""))
        .collect()
}

// ============================================================
// Statistics over a partially failed run
// ============================================================

#[tokio::test]
async fn test_thirty_percent_failures_still_produce_statistics() {
    let factors = vec![Factor::new("recognition", ["off", "on"])];
    let design = ExperimentDesign::new(factors.clone(), scenarios(), 1).unwrap();
    let engine = StatisticsEngine::from_weights("v1", [("relevance", 0.5), ("tone", 0.5)])
        .unwrap()
        .with_factors(&factors);

    let orchestrator = Orchestrator::new(
        RunConfig {
            retry: RetryPolicy {
                retry_limit: 1,
                backoff: Duration::ZERO,
                call_timeout: Duration::from_secs(5),
            },
            ..RunConfig::default()
        },
        engine.rubric().clone(),
        Capabilities {
            proposer: Arc::new(Proposing),
            critic: Some(Arc::new(Accepting) as Arc<dyn Critic>),
            judges: vec![Arc::new(Scoring) as Arc<dyn Judge>],
            change_detector: Arc::new(ExactChange),
        },
        Arc::new(Logger::silent()),
    )
    .unwrap();

    let summary = orchestrator.run(&design).await.unwrap();
    assert_eq!(summary.total, 20);
    assert_eq!(summary.failed, 6);

    let report = engine.report(&orchestrator.store().records(false));
    assert_eq!(report.counts.total, 20);
    assert_eq!(report.counts.completed, 14);
    assert_eq!(report.counts.analysed, 14);
    assert_eq!(report.failures.total, 6);
    assert_eq!(report.failures.by_kind[&FailureKind::Timeout], 6);
    assert!(report.failures.failures.iter().all(|f| f.cell.contains("s01")
        || f.cell.contains("s04")
        || f.cell.contains("s07")));

    let overall = report.overall.computed().unwrap();
    assert_eq!(overall.n, 14);
    let (low, high) = overall.ci.unwrap();
    assert!(low < overall.mean && overall.mean < high);

    for level in &report.by_factor[0].levels {
        assert_eq!(level.stats.computed().unwrap().n, 7);
    }

    let effect = report.effects[0].effect.computed().unwrap();
    assert!(effect.d > 0.8);

    let anova = report.anova.computed().unwrap();
    assert_eq!(anova.n, 14);
    assert!(anova.term("recognition").unwrap().stats.is_computed());

    // Failed cells kept their exhausted sessions
    assert_eq!(
        report.outcomes.values().map(|d| d.sessions).sum::<usize>(),
        20
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["overall"]["status"], "computed");
}

#[test]
fn test_report_over_empty_run_is_explicitly_empty() {
    let engine = StatisticsEngine::from_weights("v1", [("relevance", 1.0)]).unwrap();
    let report = engine.report(&[]);
    assert_eq!(report.overall, Estimate::NoData);
    assert!(report.by_profile.is_empty());
    assert_eq!(report.failures.total, 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["overall"]["status"], "no_data");
}

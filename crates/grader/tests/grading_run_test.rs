//! End-to-end runs of the orchestrator against in-memory collaborators.
//!
//! Verifies outcome accounting, the concurrency ceiling, and that
//! enrollment failures abort the run before anything is graded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use labgrade_core::{EnrollmentEntry, FailureStage, JobOutcome, LaunchContext};
use labgrade_grader::error::{EnrollmentError, ReportError, SandboxError, SetupError, StoreError};
use labgrade_grader::sandbox::{SandboxOutput, SandboxRequest};
use labgrade_grader::submission::Submission;
use labgrade_grader::{
    BoundedScheduler, EnrollmentSource, JobPipeline, Orchestrator, ResourceLimits, RunRequest,
    SandboxInvoker, ScoreReporter, SubmissionStore,
};

// ── fakes ───────────────────────────────────────────────────────────

struct StaticEnrollment {
    entries: Vec<EnrollmentEntry>,
}

#[async_trait]
impl EnrollmentSource for StaticEnrollment {
    async fn entries(&self, _context_id: &str) -> Result<Vec<EnrollmentEntry>, EnrollmentError> {
        Ok(self.entries.clone())
    }
}

struct UnreachableEnrollment;

#[async_trait]
impl EnrollmentSource for UnreachableEnrollment {
    async fn entries(&self, _context_id: &str) -> Result<Vec<EnrollmentEntry>, EnrollmentError> {
        Err(EnrollmentError::Database(sqlx::Error::PoolTimedOut))
    }
}

/// Notebook contents keyed by identity; the content doubles as the
/// instruction for [`ScriptedSandbox`].
struct MemoryStore {
    notebooks: HashMap<String, String>,
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn fetch(&self, identity: &str, lab: &str) -> Result<Option<Submission>, StoreError> {
        Ok(self.notebooks.get(identity).map(|body| Submission {
            location: format!("mem://{identity}/{lab}.ipynb"),
            bytes: body.clone().into_bytes(),
        }))
    }
}

/// Interprets the artifact as `score:<text>` or `exit:<code>` after a short delay,
/// and records how many invocations overlap.
#[derive(Default)]
struct ScriptedSandbox {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl SandboxInvoker for ScriptedSandbox {
    async fn invoke(&self, request: SandboxRequest) -> Result<SandboxOutput, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let script = String::from_utf8(request.artifact).unwrap();
        let delay = 5 + (script.len() as u64 * 13) % 40;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Some(score) = script.strip_prefix("score:") {
            Ok(SandboxOutput {
                score_text: format!("{score}\n"),
                diagnostics: Vec::new(),
            })
        } else if let Some(code) = script.strip_prefix("exit:") {
            Err(SandboxError::NonZeroExit {
                code: code.parse().ok(),
                diagnostics: "Traceback (most recent call last):".into(),
            })
        } else {
            panic!("unknown script {script:?}");
        }
    }
}

#[derive(Default)]
struct RecordingReporter {
    reports: Mutex<Vec<(String, f64)>>,
    fail: bool,
}

#[async_trait]
impl ScoreReporter for RecordingReporter {
    async fn report(&self, result_id: &str, _callback_url: &str, score: f64) -> Result<(), ReportError> {
        self.reports.lock().unwrap().push((result_id.to_string(), score));
        if self.fail {
            return Err(ReportError::Rejected {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(())
    }
}

// ── helpers ─────────────────────────────────────────────────────────

fn entry(identity: &str) -> EnrollmentEntry {
    let ctx = LaunchContext::from_json_str(&format!(
        r#"{{"lis_result_sourcedid":"src-{identity}","lis_outcome_service_url":"https://lms.test/outcomes"}}"#
    ))
    .unwrap();
    EnrollmentEntry::new(identity, ctx)
}

fn request() -> RunRequest {
    RunRequest {
        lab: "lab01".into(),
        context_id: "resource-link-1".into(),
        image: "grader:latest".into(),
    }
}

struct Run {
    orchestrator: Orchestrator,
    sandbox: Arc<ScriptedSandbox>,
    reporter: Arc<RecordingReporter>,
}

fn setup(
    entries: Vec<EnrollmentEntry>,
    notebooks: &[(&str, &str)],
    limit: usize,
    reporter: RecordingReporter,
) -> Run {
    let sandbox = Arc::new(ScriptedSandbox::default());
    let reporter = Arc::new(reporter);
    let store = MemoryStore {
        notebooks: notebooks
            .iter()
            .map(|(id, body)| (id.to_string(), body.to_string()))
            .collect(),
    };
    let pipeline = JobPipeline::new(
        Arc::new(store),
        sandbox.clone(),
        reporter.clone(),
        ResourceLimits::default(),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(StaticEnrollment { entries }),
        pipeline,
        BoundedScheduler::new(limit).unwrap(),
    );
    Run {
        orchestrator,
        sandbox,
        reporter,
    }
}

// ── tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn mixed_batch_yields_one_outcome_per_learner() {
    let entries = ["absent-1", "absent-2", "zero", "full", "crash"]
        .into_iter()
        .map(entry)
        .collect();
    let notebooks = [("zero", "score:0.0"), ("full", "score:1.0"), ("crash", "exit:1")];
    let run = setup(entries, &notebooks, 2, RecordingReporter::default());

    let summary = run.orchestrator.run(&request()).await.unwrap();

    assert_eq!(summary.total(), 5);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.scored, 1);
    assert_eq!(summary.reported, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.peak_concurrency <= 2);

    let by_identity: HashMap<&str, &JobOutcome> = summary
        .results
        .iter()
        .map(|r| (r.identity.as_str(), &r.outcome))
        .collect();
    assert!(matches!(by_identity["absent-1"], JobOutcome::Skipped { .. }));
    assert!(matches!(by_identity["absent-2"], JobOutcome::Skipped { .. }));
    assert_eq!(by_identity["zero"], &JobOutcome::Scored { value: 0.0 });
    assert_eq!(by_identity["full"], &JobOutcome::Reported { value: 1.0 });
    assert!(matches!(
        by_identity["crash"],
        JobOutcome::Failed { stage: FailureStage::Sandbox, .. }
    ));

    assert_eq!(run.sandbox.calls.load(Ordering::SeqCst), 3);
    assert!(run.sandbox.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(
        *run.reporter.reports.lock().unwrap(),
        vec![("src-full".to_string(), 1.0)]
    );

    let rendered = summary.to_string();
    assert!(rendered.contains("1 reported, 1 scored 0 (not reported), 2 skipped, 1 failed"));
    assert!(rendered.contains("crash: failed at sandbox"));
}

#[tokio::test(start_paused = true)]
async fn large_batch_respects_concurrency_ceiling() {
    let ids: Vec<String> = (0..60).map(|i| format!("learner-{i:02}")).collect();
    let entries = ids.iter().map(|id| entry(id)).collect();
    let scripts: Vec<(String, String)> = ids
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 5 != 0)
        .map(|(i, id)| (id.clone(), format!("score:0.{}", i % 9 + 1)))
        .collect();
    let notebooks: Vec<(&str, &str)> = scripts
        .iter()
        .map(|(id, s)| (id.as_str(), s.as_str()))
        .collect();
    let run = setup(entries, &notebooks, 7, RecordingReporter::default());

    let summary = run.orchestrator.run(&request()).await.unwrap();

    assert_eq!(summary.total(), 60);
    assert_eq!(summary.skipped, 12);
    assert_eq!(summary.reported, 48);
    assert_eq!(summary.peak_concurrency, 7);
    assert!(run.sandbox.peak.load(Ordering::SeqCst) <= 7);
    assert_eq!(run.reporter.reports.lock().unwrap().len(), 48);
}

#[tokio::test(start_paused = true)]
async fn limit_one_never_overlaps_sandboxes() {
    let entries = ["a", "b", "c", "d"].into_iter().map(entry).collect();
    let notebooks = [("a", "score:0.5"), ("b", "score:0.25"), ("c", "exit:2"), ("d", "score:1")];
    let run = setup(entries, &notebooks, 1, RecordingReporter::default());

    let summary = run.orchestrator.run(&request()).await.unwrap();

    assert_eq!(summary.total(), 4);
    assert_eq!(summary.peak_concurrency, 1);
    assert_eq!(run.sandbox.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn reporting_outage_keeps_scores_and_finishes_run() {
    let entries = ["a", "b"].into_iter().map(entry).collect();
    let notebooks = [("a", "score:0.85"), ("b", "score:0.0")];
    let reporter = RecordingReporter {
        fail: true,
        ..RecordingReporter::default()
    };
    let run = setup(entries, &notebooks, 4, reporter);

    let summary = run.orchestrator.run(&request()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.scored, 1);
    let failed = summary.failures().next().unwrap();
    assert_eq!(failed.identity, "a");
    assert_eq!(failed.outcome.score(), Some(0.85));
    assert!(matches!(
        failed.outcome,
        JobOutcome::Failed { stage: FailureStage::Report, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn panicking_job_is_contained() {
    let entries = ["ok", "weird"].into_iter().map(entry).collect();
    let notebooks = [("ok", "score:1.0"), ("weird", "not a script")];
    let run = setup(entries, &notebooks, 2, RecordingReporter::default());

    let summary = run.orchestrator.run(&request()).await.unwrap();

    assert_eq!(summary.total(), 2);
    assert_eq!(summary.reported, 1);
    assert_eq!(summary.failed, 1);
    let failed = summary.failures().next().unwrap();
    assert!(matches!(
        failed.outcome,
        JobOutcome::Failed { stage: FailureStage::Internal, .. }
    ));
}

#[tokio::test]
async fn empty_enrollment_finishes_immediately() {
    let run = setup(Vec::new(), &[], 16, RecordingReporter::default());
    let summary = run.orchestrator.run(&request()).await.unwrap();
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.peak_concurrency, 0);
}

#[tokio::test]
async fn unreachable_enrollment_is_a_setup_error() {
    let sandbox = Arc::new(ScriptedSandbox::default());
    let pipeline = JobPipeline::new(
        Arc::new(MemoryStore {
            notebooks: HashMap::new(),
        }),
        sandbox.clone(),
        Arc::new(RecordingReporter::default()),
        ResourceLimits::default(),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(UnreachableEnrollment),
        pipeline,
        BoundedScheduler::new(4).unwrap(),
    );

    let err = orchestrator.run(&request()).await.unwrap_err();
    assert!(matches!(err, SetupError::Enrollment(_)));
    assert_eq!(sandbox.calls.load(Ordering::SeqCst), 0);
}

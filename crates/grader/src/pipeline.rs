//! Per-learner grading pipeline: locate → sandbox → parse → report.
//!
//! Stages run strictly in that order and stop at the first one that does
//! not succeed. Every error is turned into a [`JobOutcome`] here, so
//! nothing a single job does can reach the scheduler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use labgrade_core::{EnrollmentEntry, FailureStage, JobOutcome, JobResult, OUTCOME_SERVICE_URL, RESULT_SOURCEDID};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ReportError, SandboxError};
use crate::reporter::ScoreReporter;
use crate::sandbox::{ResourceLimits, SandboxInvoker, SandboxRequest};
use crate::submission::SubmissionStore;

pub const NO_SUBMISSION: &str = "no submission found";

/// One learner, one assignment, one image.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub entry: EnrollmentEntry,
    pub lab: String,
    pub image: String,
}

impl Job {
    pub fn new(entry: EnrollmentEntry, lab: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry,
            lab: lab.into(),
            image: image.into(),
        }
    }
}

/// Parse sandbox stdout as a score. Surrounding whitespace is allowed;
/// NaN and infinities are not scores.
pub fn parse_score(text: &str) -> Result<f64, String> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(v) => Err(format!("score is not finite: {v}")),
        Err(e) => Err(format!("could not parse {trimmed:?} as a score: {e}")),
    }
}

#[derive(Clone)]
pub struct JobPipeline {
    store: Arc<dyn SubmissionStore>,
    sandbox: Arc<dyn SandboxInvoker>,
    reporter: Arc<dyn ScoreReporter>,
    limits: ResourceLimits,
}

impl JobPipeline {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        sandbox: Arc<dyn SandboxInvoker>,
        reporter: Arc<dyn ScoreReporter>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            store,
            sandbox,
            reporter,
            limits,
        }
    }

    /// Grade one job. Always yields a result, even if a stage panics.
    pub async fn execute(&self, job: Job) -> JobResult {
        let start = Instant::now();
        let mut diagnostics = Vec::new();

        let outcome = match AssertUnwindSafe(self.run_stages(&job, &mut diagnostics))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                error!(job_id = %job.id, identity = %job.entry.identity, %detail, "grading job panicked");
                JobOutcome::failed(FailureStage::Internal, detail)
            }
        };

        JobResult {
            job_id: job.id,
            identity: job.entry.identity,
            outcome,
            diagnostics,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run_stages(&self, job: &Job, diagnostics: &mut Vec<String>) -> JobOutcome {
        let identity = job.entry.identity.as_str();

        // 1. Locate
        let submission = match self.store.fetch(identity, &job.lab).await {
            Ok(Some(sub)) => sub,
            Ok(None) => {
                debug!(identity, lab = %job.lab, "skipping, no submission");
                return JobOutcome::skipped(NO_SUBMISSION);
            }
            Err(e) => {
                warn!(identity, error = %e, "submission lookup failed");
                return JobOutcome::failed(FailureStage::Locate, e);
            }
        };
        debug!(identity, location = %submission.location, "grading submission");

        // 2. Invoke
        let request = SandboxRequest {
            image: job.image.clone(),
            lab: job.lab.clone(),
            artifact: submission.bytes,
            limits: self.limits.clone(),
        };
        let output = match self.sandbox.invoke(request).await {
            Ok(output) => output,
            Err(e) => {
                if let SandboxError::NonZeroExit { diagnostics: d, .. }
                | SandboxError::OutOfMemory { diagnostics: d } = &e
                {
                    diagnostics.extend(d.lines().map(str::to_string));
                }
                warn!(identity, error = %e, exit_code = ?e.exit_code(), "sandbox failed");
                return JobOutcome::failed(FailureStage::Sandbox, e);
            }
        };
        diagnostics.extend(output.diagnostics);

        // 3. Parse
        let score = match parse_score(&output.score_text) {
            Ok(score) => score,
            Err(detail) => {
                warn!(identity, %detail, "unparseable sandbox output");
                return JobOutcome::failed(FailureStage::Parse, detail);
            }
        };

        // Zero means "leave the gradebook alone", not "record a zero".
        if score == 0.0 {
            info!(identity, "scored 0, not reporting");
            return JobOutcome::Scored { value: score };
        }

        // 4. Report
        match self.report(job, score).await {
            Ok(()) => {
                info!(identity, score, "posted grade");
                JobOutcome::Reported { value: score }
            }
            Err(e) => {
                warn!(identity, score, error = %e, "reporting failed, score kept");
                JobOutcome::Failed {
                    stage: FailureStage::Report,
                    detail: e.to_string(),
                    score: Some(score),
                }
            }
        }
    }

    async fn report(&self, job: &Job, score: f64) -> Result<(), ReportError> {
        let ctx = &job.entry.context;
        let result_id = ctx
            .result_sourcedid()
            .ok_or(ReportError::MissingContext(RESULT_SOURCEDID))?;
        let callback_url = ctx
            .outcome_service_url()
            .ok_or(ReportError::MissingContext(OUTCOME_SERVICE_URL))?;
        self.reporter.report(result_id, callback_url, score).await
    }
}

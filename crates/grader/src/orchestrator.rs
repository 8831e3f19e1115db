//! Drives one grading run: enrollment → jobs → scheduler → summary.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use labgrade_core::{JobOutcome, JobResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::enrollment::EnrollmentSource;
use crate::error::SetupError;
use crate::pipeline::{Job, JobPipeline};
use crate::scheduler::BoundedScheduler;

/// What to grade in a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Assignment identifier.
    pub lab: String,
    /// Grading context the enrollment is read for.
    pub context_id: String,
    pub image: String,
}

/// Per-outcome counts for a finished run, plus every job's result.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub skipped: usize,
    /// Graded, deliberately not reported (zero score).
    pub scored: usize,
    pub reported: usize,
    pub failed: usize,
    pub peak_concurrency: usize,
    pub results: Vec<JobResult>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            skipped: 0,
            scored: 0,
            reported: 0,
            failed: 0,
            peak_concurrency: 0,
            results: Vec::new(),
        }
    }

    fn record(&mut self, result: JobResult) {
        match result.outcome {
            JobOutcome::Skipped { .. } => self.skipped += 1,
            JobOutcome::Scored { .. } => self.scored += 1,
            JobOutcome::Reported { .. } => self.reported += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| r.outcome.is_failed())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graded {} learners in {}s: {} reported, {} scored 0 (not reported), {} skipped, {} failed",
            self.total(),
            (self.finished_at - self.started_at).num_seconds(),
            self.reported,
            self.scored,
            self.skipped,
            self.failed,
        )?;
        for r in self.failures() {
            writeln!(f, "  {}: {}", r.identity, r.outcome)?;
        }
        Ok(())
    }
}

pub struct Orchestrator {
    source: Arc<dyn EnrollmentSource>,
    pipeline: Arc<JobPipeline>,
    scheduler: BoundedScheduler,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn EnrollmentSource>, pipeline: JobPipeline, scheduler: BoundedScheduler) -> Self {
        Self {
            source,
            pipeline: Arc::new(pipeline),
            scheduler,
        }
    }

    /// Grade everyone enrolled in `request.context_id`.
    ///
    /// Only a failure to read the enrollment is an error; job failures are
    /// counted in the summary.
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary, SetupError> {
        let started_at = Utc::now();
        let entries = self.source.entries(&request.context_id).await?;
        info!(
            lab = %request.lab,
            context_id = %request.context_id,
            learners = entries.len(),
            concurrency = self.scheduler.limit(),
            "starting grading run"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let lab = request.lab.clone();
        let image = request.image.clone();
        let jobs = entries.into_iter().map(move |entry| {
            let pipeline = Arc::clone(&pipeline);
            let job = Job::new(entry, lab.clone(), image.clone());
            async move { pipeline.execute(job).await }
        });

        let mut schedule = self.scheduler.run(jobs);
        let stats = schedule.stats();
        let mut summary = RunSummary::new(started_at);

        while let Some(result) = schedule.next().await {
            log_result(&result);
            summary.record(result);
        }

        summary.finished_at = Utc::now();
        summary.peak_concurrency = stats.peak_in_flight();
        Ok(summary)
    }
}

fn log_result(result: &JobResult) {
    for line in &result.diagnostics {
        info!(identity = %result.identity, "{}", line);
    }
    match &result.outcome {
        JobOutcome::Failed { stage, detail, score } => warn!(
            identity = %result.identity,
            job_id = %result.job_id,
            %stage,
            score = ?score,
            duration_ms = result.duration_ms,
            "job failed: {}",
            detail
        ),
        outcome => info!(
            identity = %result.identity,
            job_id = %result.job_id,
            duration_ms = result.duration_ms,
            "{}",
            outcome
        ),
    }
}

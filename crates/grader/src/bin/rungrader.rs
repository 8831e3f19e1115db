//! rungrader: grade one lab for everyone launched from an LMS resource link.
//!
//! Exits non-zero only when the run cannot start (bad config, missing
//! credentials, database unreachable) or is interrupted. Individual
//! learners that fail to grade are listed in the summary instead.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use labgrade_core::config::{load_dotenv, Config};
use labgrade_grader::{
    BoundedScheduler, DockerSandbox, FsSubmissionStore, JobPipeline, LtiCredentials,
    LtiOutcomeReporter, Orchestrator, PgEnrollmentSource, ResourceLimits, RunRequest, SetupError,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Grade a lab inside docker sandboxes and post scores to the LMS.
#[derive(Parser, Debug)]
#[command(name = "rungrader", version, about)]
struct Cli {
    /// Lab to grade.
    lab: String,

    /// Resource Link ID for this lab.
    resource_link_id: String,

    /// Image to use for grading.
    #[arg(long)]
    image: Option<String>,

    /// Maximum number of sandboxes running at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-learner sandbox timeout in seconds (0 disables).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Hostname or socket directory of the postgres server.
    #[arg(long)]
    postgres_host: Option<String>,

    /// Username for connecting to postgres.
    #[arg(long)]
    postgres_username: Option<String>,

    /// Database holding the LTI launch records.
    #[arg(long)]
    postgres_dbname: Option<String>,

    /// Directory the submission path template is resolved against.
    #[arg(long)]
    submissions_root: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags win over environment configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(ref image) = self.image {
            config.sandbox.image = image.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.grading.concurrency = concurrency;
            config.clear_rejected("GRADER_CONCURRENCY");
        }
        if let Some(timeout) = self.timeout_secs {
            config.sandbox.timeout_secs = timeout;
            config.clear_rejected("SANDBOX_TIMEOUT_SECS");
        }
        if let Some(ref host) = self.postgres_host {
            config.postgres.host = host.clone();
        }
        if let Some(ref user) = self.postgres_username {
            config.postgres.username = user.clone();
        }
        if let Some(ref db) = self.postgres_dbname {
            config.postgres.database = db.clone();
        }
        if let Some(ref root) = self.submissions_root {
            config.submissions.root = root.clone();
        }
    }
}

// ── setup ───────────────────────────────────────────────────────────

async fn build(config: &Config) -> Result<Orchestrator, SetupError> {
    config.validate()?;

    let credentials = LtiCredentials::from_config(&config.lti)?;
    let reporter = LtiOutcomeReporter::new(credentials).map_err(|e| SetupError::Reporter(e.to_string()))?;
    let scheduler = BoundedScheduler::new(config.grading.concurrency)?;
    let source = PgEnrollmentSource::connect(&config.postgres).await?;

    let pipeline = JobPipeline::new(
        Arc::new(FsSubmissionStore::from_config(&config.submissions)),
        Arc::new(DockerSandbox::from_config(&config.sandbox)),
        Arc::new(reporter),
        ResourceLimits::from_config(&config.sandbox),
    );

    Ok(Orchestrator::new(Arc::new(source), pipeline, scheduler))
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    cli.apply(&mut config);
    config.log_summary();

    let orchestrator = build(&config).await.context("grading run setup failed")?;
    let request = RunRequest {
        lab: cli.lab.clone(),
        context_id: cli.resource_link_id.clone(),
        image: config.sandbox.image.clone(),
    };

    // Dropping the run on Ctrl-C drops every in-flight job, which kills
    // its docker client and force-removes its container.
    let summary = tokio::select! {
        res = orchestrator.run(&request) => res.context("grading run failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, tearing down running sandboxes");
            anyhow::bail!("grading run interrupted");
        }
    };

    info!(
        reported = summary.reported,
        scored = summary.scored,
        skipped = summary.skipped,
        failed = summary.failed,
        peak_concurrency = summary.peak_concurrency,
        "grading run finished"
    );
    print!("{summary}");

    Ok(())
}

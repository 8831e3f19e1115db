//! Batch grader for notebook assignments.
//!
//! For every learner launched from a grading context, locate their saved
//! notebook, grade it inside a resource-capped docker sandbox, and post
//! any non-zero score back to the LMS outcome service.
//!
//! - [`submission`]: where notebooks live ([`SubmissionStore`])
//! - [`enrollment`]: who to grade ([`EnrollmentSource`])
//! - [`sandbox`]: isolated execution ([`SandboxInvoker`])
//! - [`reporter`]: score submission ([`ScoreReporter`])
//! - [`pipeline`]: one learner end to end ([`JobPipeline`])
//! - [`scheduler`]: at most K jobs at once ([`BoundedScheduler`])
//! - [`orchestrator`]: a whole run ([`Orchestrator`])

pub mod enrollment;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod reporter;
pub mod sandbox;
pub mod scheduler;
pub mod submission;

pub use enrollment::{EnrollmentSource, PgEnrollmentSource};
pub use error::{EnrollmentError, ReportError, SandboxError, SchedulerError, SetupError, StoreError};
pub use orchestrator::{Orchestrator, RunRequest, RunSummary};
pub use pipeline::{Job, JobPipeline};
pub use reporter::{LtiCredentials, LtiOutcomeReporter, ScoreReporter};
pub use sandbox::{DockerSandbox, ResourceLimits, SandboxInvoker};
pub use scheduler::BoundedScheduler;
pub use submission::{FsSubmissionStore, SubmissionStore};

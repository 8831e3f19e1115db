use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage at which a grading job gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Locate,
    Sandbox,
    Parse,
    Report,
    Internal,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Locate => write!(f, "locate"),
            FailureStage::Sandbox => write!(f, "sandbox"),
            FailureStage::Parse => write!(f, "parse"),
            FailureStage::Report => write!(f, "report"),
            FailureStage::Internal => write!(f, "internal"),
        }
    }
}

/// Terminal state of one grading job. Exactly one per enrollment entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Nothing to grade, e.g. the learner never saved a notebook.
    Skipped { reason: String },
    /// Graded but not reported. Only a zero score ends here.
    Scored { value: f64 },
    /// Graded and accepted by the outcome service.
    Reported { value: f64 },
    /// `score` is kept when grading succeeded and only reporting failed,
    /// so the grade can be re-submitted without re-running the sandbox.
    Failed {
        stage: FailureStage,
        detail: String,
        score: Option<f64>,
    },
}

impl JobOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        JobOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(stage: FailureStage, detail: impl ToString) -> Self {
        JobOutcome::Failed {
            stage,
            detail: detail.to_string(),
            score: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }

    /// Computed score, if grading got that far.
    pub fn score(&self) -> Option<f64> {
        match self {
            JobOutcome::Scored { value } | JobOutcome::Reported { value } => Some(*value),
            JobOutcome::Failed { score, .. } => *score,
            JobOutcome::Skipped { .. } => None,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            JobOutcome::Scored { value } => write!(f, "scored {value} (not reported)"),
            JobOutcome::Reported { value } => write!(f, "reported {value}"),
            JobOutcome::Failed {
                stage,
                detail,
                score: Some(score),
            } => write!(f, "failed at {stage} with score {score}: {detail}"),
            JobOutcome::Failed { stage, detail, .. } => write!(f, "failed at {stage}: {detail}"),
        }
    }
}

/// Outcome of one job plus what the operator needs to see about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub identity: String,
    pub outcome: JobOutcome,
    /// Sandbox stderr with benign warnings removed.
    pub diagnostics: Vec<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_preserved_on_report_failure() {
        let outcome = JobOutcome::Failed {
            stage: FailureStage::Report,
            detail: "connection refused".into(),
            score: Some(0.85),
        };
        assert_eq!(outcome.score(), Some(0.85));
        assert!(outcome.is_failed());
        assert_eq!(
            outcome.to_string(),
            "failed at report with score 0.85: connection refused"
        );
    }

    #[test]
    fn skipped_has_no_score() {
        let outcome = JobOutcome::skipped("no submission found");
        assert_eq!(outcome.score(), None);
        assert_eq!(outcome.to_string(), "skipped (no submission found)");
    }

    #[test]
    fn serializes_with_tag() {
        let json = serde_json::to_value(JobOutcome::Reported { value: 1.0 }).unwrap();
        assert_eq!(json["outcome"], "reported");
        assert_eq!(json["value"], 1.0);

        let json = serde_json::to_value(JobOutcome::failed(FailureStage::Sandbox, "exit 1")).unwrap();
        assert_eq!(json["stage"], "sandbox");
    }
}

//! Isolated execution of a submission against the grading image.
//!
//! - [`SandboxInvoker`]: the seam the pipeline calls through
//! - [`DockerSandbox`]: `docker run` with memory cap, no network, auto-removal
//! - [`DiagnosticFilter`]: drops known-benign stderr lines

mod diagnostics;
mod docker;

pub use diagnostics::DiagnosticFilter;
pub use docker::DockerSandbox;

use std::time::Duration;

use async_trait::async_trait;
use labgrade_core::config::SandboxConfig;

use crate::error::SandboxError;

/// Resource and network policy applied to one sandbox run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Docker memory syntax, e.g. "1G".
    pub memory: String,
    pub network_disabled: bool,
    pub timeout: Option<Duration>,
}

impl ResourceLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            memory: config.memory_limit.clone(),
            network_disabled: config.network_disabled,
            timeout: config.timeout(),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

/// Everything a sandbox needs to grade one submission.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub image: String,
    /// Assignment identifier; selects the notebook path inside the image.
    pub lab: String,
    /// Delivered on the sandbox's stdin.
    pub artifact: Vec<u8>,
    pub limits: ResourceLimits,
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct SandboxOutput {
    /// Raw stdout; expected to hold a single number.
    pub score_text: String,
    /// Filtered stderr lines.
    pub diagnostics: Vec<String>,
}

#[async_trait]
pub trait SandboxInvoker: Send + Sync {
    /// Run the request to completion. Non-zero exit, memory kill, and
    /// timeout are all errors; none of them is ever turned into a score.
    async fn invoke(&self, request: SandboxRequest) -> Result<SandboxOutput, SandboxError>;
}

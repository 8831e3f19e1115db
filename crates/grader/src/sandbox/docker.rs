//! `docker run` based sandbox.
//!
//! Every container is started with a unique name and `--rm`. A
//! [`ContainerGuard`] removes it by name if the run is abandoned (timeout,
//! dropped future, operator abort), since killing the docker client alone
//! leaves the container running.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use labgrade_core::config::SandboxConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DiagnosticFilter, SandboxInvoker, SandboxOutput, SandboxRequest};
use crate::error::SandboxError;

/// Exit status docker reports for a SIGKILLed container, which is what the
/// kernel OOM killer sends when the memory cgroup limit is hit.
const OOM_EXIT_CODE: i32 = 137;

/// Runs submissions in throwaway docker containers.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    /// Client program followed by any leading arguments.
    docker: Vec<String>,
    config: SandboxConfig,
    filter: DiagnosticFilter,
}

impl DockerSandbox {
    pub fn from_config(config: &SandboxConfig) -> Self {
        let mut docker: Vec<String> = config
            .docker_bin
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if docker.is_empty() {
            docker.push("docker".to_string());
        }
        Self {
            docker,
            config: config.clone(),
            filter: DiagnosticFilter::new(config.suppress_prefixes.clone()),
        }
    }

    /// Full argument list after the client program.
    fn run_args(&self, container: &str, request: &SandboxRequest) -> Vec<String> {
        let mut args: Vec<String> = self.docker[1..].to_vec();
        args.extend([
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            format!("--name={container}"),
            format!("--memory={}", request.limits.memory),
            // Equal swap ceiling, so the limit cannot be dodged by swapping.
            format!("--memory-swap={}", request.limits.memory),
        ]);
        if request.limits.network_disabled {
            args.push("--network=none".to_string());
        }
        args.push(request.image.clone());
        args.push(self.config.grade_command.clone());
        args.push(self.config.notebook_path(&request.lab));
        args
    }

    fn command(&self) -> Command {
        Command::new(&self.docker[0])
    }
}

#[async_trait]
impl SandboxInvoker for DockerSandbox {
    async fn invoke(&self, request: SandboxRequest) -> Result<SandboxOutput, SandboxError> {
        let container = format!("labgrade-{}", Uuid::new_v4().simple());
        let args = self.run_args(&container, &request);
        debug!(container = %container, image = %request.image, lab = %request.lab, "starting sandbox");

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;
        let guard = ContainerGuard::new(&self.docker, container);

        let stdin = child.stdin.take();
        let artifact = request.artifact;
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&artifact).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let run = async { tokio::join!(feed, child.wait_with_output()) };
        let (fed, output) = match request.limits.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(done) => done,
                Err(_) => {
                    warn!(container = %guard.name, ?limit, "sandbox timed out");
                    return Err(SandboxError::TimedOut(limit));
                }
            },
            None => run.await,
        };
        let output = output?;
        guard.disarm();

        // The grader may exit before reading all of stdin; its exit status decides.
        if let Err(e) = fed {
            if e.kind() != ErrorKind::BrokenPipe {
                return Err(SandboxError::Io(e));
            }
            debug!("sandbox closed stdin early");
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = self.filter.filter(&stderr);

        match output.status.code() {
            Some(0) => Ok(SandboxOutput {
                score_text: String::from_utf8_lossy(&output.stdout).into_owned(),
                diagnostics,
            }),
            Some(OOM_EXIT_CODE) => Err(SandboxError::OutOfMemory {
                diagnostics: diagnostics.join("\n"),
            }),
            code => Err(SandboxError::NonZeroExit {
                code,
                diagnostics: diagnostics.join("\n"),
            }),
        }
    }
}

/// Force-removes a named container on drop unless disarmed.
struct ContainerGuard {
    docker: Vec<String>,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: &[String], name: String) -> Self {
        Self {
            docker: docker.to_vec(),
            name,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Blocking std spawn: this also runs while the runtime shuts down.
        // Reaped on a detached thread.
        let spawned = std::process::Command::new(&self.docker[0])
            .args(&self.docker[1..])
            .args(["rm", "-f", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                debug!(container = %self.name, "removing abandoned sandbox");
                std::thread::spawn(move || child.wait());
            }
            Err(e) => warn!(container = %self.name, error = %e, "failed to remove sandbox container"),
        }
    }
}

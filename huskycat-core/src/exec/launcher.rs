//! The seam between scheduling and process execution.
//!
//! The scheduler only knows this trait; the real implementation delegates to
//! `huskycat-tool-runner`, and tests drive the scheduler with scripted
//! launchers instead of real subprocesses.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use huskycat_tool_runner::{SpawnSpec, run_captured};

/// One resolved tool invocation, ready to spawn.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub tool: String,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Extraction cache prepended to the child PATH.
    pub path_prepend: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

#[async_trait]
pub trait ToolLauncher: Send + Sync {
    /// Run the invocation to completion (or deadline, or cancellation) and
    /// capture output.
    ///
    /// When `cancel` fires mid-invocation, the implementation must tear the
    /// tool's process tree down and report the outcome as timed out. An
    /// `Err` means the process could not be started at all; findings,
    /// timeouts and cancellations are normal `Ok` outcomes.
    async fn launch(
        &self,
        request: &LaunchRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<LaunchOutcome>;
}

/// Real subprocess launcher.
pub struct ProcessLauncher;

#[async_trait]
impl ToolLauncher for ProcessLauncher {
    async fn launch(
        &self,
        request: &LaunchRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<LaunchOutcome> {
        let spec = SpawnSpec::new(request.argv.clone(), request.cwd.clone())
            .with_deadline(request.timeout)
            .with_path_prepend(request.path_prepend.clone())
            .with_cancellation(cancel);
        let captured = run_captured(&spec).await?;
        Ok(LaunchOutcome {
            success: captured.success,
            code: captured.code,
            stdout: captured.stdout,
            stderr: captured.stderr,
            duration: captured.duration,
            timed_out: captured.timed_out,
        })
    }
}

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::process_group::{set_process_group, terminate_group};

/// Everything needed to run one tool invocation.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment entries for the child.
    pub env: Vec<(String, String)>,
    /// Directory prepended to the child's PATH (the extraction cache).
    pub path_prepend: Option<PathBuf>,
    /// Per-invocation deadline.
    pub deadline: Duration,
    /// Grace period between SIGTERM and SIGKILL when the invocation is
    /// terminated early.
    pub grace: Duration,
    /// Run-level cancellation; an already-started invocation is torn down
    /// the same way a deadline expiry is.
    pub cancel: CancellationToken,
}

impl SpawnSpec {
    pub fn new(argv: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            argv,
            cwd,
            env: Vec::new(),
            path_prepend: None,
            deadline: Duration::from_secs(60),
            grace: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_path_prepend(mut self, dir: Option<PathBuf>) -> Self {
        self.path_prepend = dir;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Output of a completed (or terminated) invocation.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

/// Why the invocation stopped waiting.
enum WaitEnd {
    Completed(
        std::io::Result<(Vec<u8>, Vec<u8>)>,
        std::io::Result<std::process::ExitStatus>,
    ),
    Terminated { cancelled: bool },
}

/// Spawn the argv in its own process group and capture both streams.
///
/// Deadline expiry and run cancellation end the invocation the same way:
/// SIGTERM to the whole group, a concurrent reap of the direct child, and
/// SIGKILL after the grace period for anything still holding on.
pub async fn run_captured(spec: &SpawnSpec) -> Result<CapturedOutput> {
    let (program, args) = spec
        .argv
        .split_first()
        .filter(|(p, _)| !p.is_empty())
        .map(|(p, rest)| (p.clone(), rest.to_vec()))
        .unwrap_or_default();
    if program.is_empty() {
        bail!("empty argv");
    }

    let mut command = Command::new(&program);
    command
        .args(&args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &spec.env {
        command.env(key, value);
    }
    if let Some(prefix) = &spec.path_prepend {
        let inherited = std::env::var("PATH").unwrap_or_default();
        command.env("PATH", format!("{}:{}", prefix.display(), inherited));
    }

    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| set_process_group());
    }

    let started = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn `{program}`"))?;
    let pid = child.id();

    let mut stdout_pipe = child.stdout.take().context("child stdout not piped")?;
    let mut stderr_pipe = child.stderr.take().context("child stderr not piped")?;

    let ended = {
        let work = async {
            let reader = async {
                let mut out = Vec::new();
                let mut err = Vec::new();
                let (a, b) = tokio::join!(
                    stdout_pipe.read_to_end(&mut out),
                    stderr_pipe.read_to_end(&mut err)
                );
                a?;
                b?;
                Ok::<_, std::io::Error>((out, err))
            };
            tokio::join!(reader, child.wait())
        };
        tokio::pin!(work);
        tokio::select! {
            (streams, status) = &mut work => WaitEnd::Completed(streams, status),
            () = tokio::time::sleep(spec.deadline) => WaitEnd::Terminated { cancelled: false },
            () = spec.cancel.cancelled() => WaitEnd::Terminated { cancelled: true },
        }
    };

    match ended {
        WaitEnd::Completed(streams, status) => {
            let (out, err) = streams.context("failed to read tool output")?;
            let status = status.context("failed to wait for tool")?;
            Ok(CapturedOutput {
                code: status.code(),
                success: status.success(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
                duration: started.elapsed(),
                timed_out: false,
            })
        }
        WaitEnd::Terminated { cancelled } => {
            debug!(%program, pid, cancelled, "terminating tool process group");
            if let Some(pid) = pid {
                let grace = spec.grace;
                // Reap while the blocking task signals, so the group leader
                // does not linger as a zombie through the grace window. If
                // group signalling is unavailable, fall back to killing the
                // direct child so the reap stays bounded.
                let killer =
                    tokio::task::spawn_blocking(move || terminate_group(pid, grace));
                let reap = tokio::time::timeout(grace + Duration::from_secs(1), child.wait());
                if reap.await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                if let Ok(Err(error)) = killer.await {
                    debug!(%error, "group termination failed");
                }
            } else {
                let _ = child.wait().await;
            }
            Ok(CapturedOutput {
                code: None,
                success: false,
                stdout: String::new(),
                stderr: if cancelled {
                    "terminated: run cancelled".to_string()
                } else {
                    String::new()
                },
                duration: started.elapsed(),
                timed_out: true,
            })
        }
    }
}

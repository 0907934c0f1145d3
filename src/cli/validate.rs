//! The `validate` subcommand: every product mode funnels through here.

use anyhow::Result;
use huskycat_commons::ExitCode;
use huskycat_core::engine::{ValidationEngine, ValidationRequest};
use huskycat_core::mode::{Interactivity, Mode, OutputFormat};
use huskycat_core::progress::{LogSink, NoopSink, ProgressSink, TtyRenderer};
use huskycat_core::results;
use huskycat_core::supervisor::{self, PriorDecision};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::args::ValidateArgs;
use crate::cli::context::StartupContext;

pub async fn run(args: ValidateArgs, explicit_mode: Option<Mode>) -> Result<ExitCode> {
    let context = StartupContext::resolve(explicit_mode, false)?;
    let mut adapter = context.adapter();
    if args.json {
        adapter.output = OutputFormat::Json;
    }
    debug!(mode = context.mode.as_str(), "mode resolved");

    let engine = context.engine(adapter.clone())?;
    supervisor::reap_stale_pids(engine.store());

    // Parent side of the non-blocking hook: check the previous run, spawn
    // the detached child, and get out of the commit's way.
    if context.mode == Mode::GitHooksNonblocking && args.child_run.is_none() {
        return run_nonblocking_parent(&args, &engine).await;
    }

    // The prior-run prompt also guards interactive CLI runs.
    if args.child_run.is_none() && adapter.interactivity == Interactivity::Full {
        let interactive = std::io::stdin().is_terminal();
        if supervisor::check_prior(engine.store(), interactive)? == PriorDecision::Abort {
            return Ok(ExitCode::ValidationFailed);
        }
    }

    let request = ValidationRequest {
        targets: args.paths.clone(),
        staged: args.staged,
        fix: args.fix,
        all: args.all,
        only: Vec::new(),
        run_id: args.child_run.clone(),
    };

    let is_child = args.child_run.is_some();
    let (sink, renderer): (Arc<dyn ProgressSink>, Option<Arc<TtyRenderer>>) = if is_child {
        // The child's stderr is the run log.
        (Arc::new(LogSink::new(std::io::stderr())), None)
    } else if adapter.emit_progress && std::io::stderr().is_terminal() {
        let renderer = TtyRenderer::start(engine.registry().len());
        (renderer.clone(), Some(renderer))
    } else {
        (Arc::new(NoopSink), None)
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = engine.run(&request, sink, cancel.clone()).await;
    if let Some(renderer) = renderer {
        renderer.finish();
    }
    if is_child {
        supervisor::finish_child(engine.store());
    }
    let run = outcome?;

    if cancel.is_cancelled() {
        eprintln!("huskycat: interrupted");
        return Ok(ExitCode::Interrupted);
    }

    let rendered = results::serialize(&run, adapter.output, &engine.fixable_tools())?;
    if !rendered.is_empty() {
        print!("{rendered}");
    }
    Ok(ValidationEngine::run_exit_code(&run))
}

/// Check the previous run, spawn the detached child, write its pid file,
/// return. Everything here except the prompt must finish within 100 ms.
async fn run_nonblocking_parent(
    args: &ValidateArgs,
    engine: &ValidationEngine,
) -> Result<ExitCode> {
    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    if supervisor::check_prior(engine.store(), interactive)? == PriorDecision::Abort {
        return Ok(ExitCode::ValidationFailed);
    }

    let run_id = results::new_run_id();
    let child_args = rebuild_child_args(args, &run_id);
    let pid = supervisor::spawn_detached_child(
        engine.store(),
        &run_id,
        Mode::GitHooksNonblocking,
        &engine.repo().root,
        &child_args,
    )?;

    eprintln!("huskycat: validation running in background (run {run_id}, pid {pid})");
    Ok(ExitCode::Success)
}

/// Reconstruct the argv the child needs to repeat this invocation.
fn rebuild_child_args(args: &ValidateArgs, run_id: &str) -> Vec<String> {
    let mut argv = vec![
        "validate".to_string(),
        "--mode".to_string(),
        "git-hooks-nonblocking".to_string(),
        "--child-run".to_string(),
        run_id.to_string(),
    ];
    if args.staged {
        argv.push("--staged".to_string());
    }
    if args.fix {
        argv.push("--fix".to_string());
    }
    if args.all {
        argv.push("--all".to_string());
    }
    for path in &args.paths {
        argv.push(path.display().to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_args_round_trip_the_invocation() {
        let args = ValidateArgs {
            paths: vec!["src".into()],
            staged: true,
            fix: false,
            all: false,
            json: false,
            child_run: None,
        };
        let argv = rebuild_child_args(&args, "run-1");
        assert_eq!(
            argv,
            vec![
                "validate",
                "--mode",
                "git-hooks-nonblocking",
                "--child-run",
                "run-1",
                "--staged",
                "src"
            ]
        );
    }
}

//! DAG scheduler with a bounded worker pool.
//!
//! Tools become eligible when every dependency present in the run has reached
//! a terminal status; eligibility is recomputed each time any tool completes.
//! Unavailable tools and tools behind a failed dependency are resolved
//! immediately without consuming a worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exec::launcher::{LaunchOutcome, LaunchRequest, ToolLauncher};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::results::{Aggregator, ToolResult, ToolStatus};

/// One schedulable unit: a tool over its matched file batch.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub tool: String,
    pub depends_on: Vec<String>,
    pub estimated_cost: u32,
    /// Reporting target: the single file, or `<batch>`.
    pub target: String,
    /// `None` iff the router verdict was unavailable.
    pub request: Option<LaunchRequest>,
    pub unavailable_reason: Option<String>,
    /// Files re-stat'ed after a fixing invocation to detect modification.
    pub fix_probe: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedState {
    Pending,
    Running,
    Terminal(ToolStatus),
}

pub struct ParallelExecutor {
    launcher: Arc<dyn ToolLauncher>,
    config: ExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(launcher: Arc<dyn ToolLauncher>, config: ExecutorConfig) -> Self {
        Self { launcher, config }
    }

    /// Run every work item to a terminal status, committing results to the
    /// aggregator as they arrive. Returns when the whole set is terminal.
    pub async fn execute(
        &self,
        items: Vec<WorkItem>,
        aggregator: &Aggregator,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) {
        let items: HashMap<String, WorkItem> = items
            .into_iter()
            .map(|item| (item.tool.clone(), item))
            .collect();
        let mut states: HashMap<String, SchedState> = items
            .keys()
            .map(|name| (name.clone(), SchedState::Pending))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut join_set: JoinSet<(String, ToolResult)> = JoinSet::new();
        let mut stop_new = false;
        let mut failure_count = 0usize;

        loop {
            if cancel.is_cancelled() {
                stop_new = true;
            }

            // Resolve every tool that can terminate without a worker, then
            // collect the eligible set. Skips cascade, so iterate to a fixed
            // point.
            loop {
                let mut changed = false;
                for (name, item) in &items {
                    if states[name] != SchedState::Pending {
                        continue;
                    }
                    if let Some(reason) = &item.unavailable_reason {
                        let result = ToolResult::unavailable(name, &item.target, reason.clone());
                        sink.update(name, finished_event(&result));
                        aggregator.add(result);
                        states.insert(name.clone(), SchedState::Terminal(ToolStatus::Unavailable));
                        changed = true;
                        continue;
                    }
                    if let Some(blocker) = self.failed_dependency(item, &states) {
                        let result = ToolResult::skipped(
                            name,
                            &item.target,
                            format!("dependency {blocker} failed"),
                        );
                        sink.update(name, finished_event(&result));
                        aggregator.add(result);
                        states.insert(name.clone(), SchedState::Terminal(ToolStatus::Skipped));
                        changed = true;
                        continue;
                    }
                    if stop_new && self.deps_terminal(item, &states) {
                        let reason = if cancel.is_cancelled() {
                            "cancelled"
                        } else {
                            "fail-fast: an earlier tool failed"
                        };
                        let result = ToolResult::skipped(name, &item.target, reason);
                        sink.update(name, finished_event(&result));
                        aggregator.add(result);
                        states.insert(name.clone(), SchedState::Terminal(ToolStatus::Skipped));
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            if !stop_new {
                let mut eligible: Vec<&WorkItem> = items
                    .values()
                    .filter(|item| {
                        states[&item.tool] == SchedState::Pending
                            && self.deps_terminal(item, &states)
                    })
                    .collect();
                // Costly tools first to shorten the tail; names for determinism.
                eligible.sort_by(|a, b| {
                    b.estimated_cost
                        .cmp(&a.estimated_cost)
                        .then_with(|| a.tool.cmp(&b.tool))
                });

                for item in eligible {
                    states.insert(item.tool.clone(), SchedState::Running);
                    join_set.spawn(run_one(
                        item.clone(),
                        Arc::clone(&self.launcher),
                        Arc::clone(&semaphore),
                        Arc::clone(&sink),
                        cancel.clone(),
                    ));
                }
            }

            let all_terminal = states
                .values()
                .all(|state| matches!(state, SchedState::Terminal(_)));
            if all_terminal {
                break;
            }
            if join_set.is_empty() {
                // A drained join set cannot host a Running entry; anything
                // still marked Running lost its worker to a panic.
                for (name, state) in states.iter_mut() {
                    if *state == SchedState::Running {
                        let target = items
                            .get(name)
                            .map(|i| i.target.clone())
                            .unwrap_or_default();
                        let result = ToolResult {
                            tool: name.clone(),
                            target,
                            status: ToolStatus::Failed,
                            error_count: 1,
                            warning_count: 0,
                            duration_ns: 0,
                            stdout: String::new(),
                            stderr: "worker aborted unexpectedly".to_string(),
                            fixed: None,
                            skip_reason: None,
                        };
                        sink.update(name, finished_event(&result));
                        aggregator.add(result);
                        *state = SchedState::Terminal(ToolStatus::Failed);
                    }
                }
                // Nothing running and nothing startable: the skip pass above
                // terminates the rest next iteration.
                if !stop_new {
                    warn!("scheduler stalled with pending tools; aborting remainder");
                    stop_new = true;
                }
                continue;
            }

            match join_set.join_next().await {
                Some(Ok((name, result))) => {
                    let status = result.status;
                    debug!(tool = %name, ?status, "tool reached terminal status");
                    states.insert(name, SchedState::Terminal(status));
                    if status.is_failure() {
                        failure_count += 1;
                        if self.config.fail_fast {
                            stop_new = true;
                            // In-flight tools get to finish after the first
                            // failure; a second one takes them down too.
                            if failure_count >= 2 {
                                cancel.cancel();
                            }
                        }
                    }
                    aggregator.add(result);
                }
                Some(Err(join_error)) => {
                    warn!(%join_error, "tool task panicked");
                }
                None => {}
            }
        }
    }

    fn deps_terminal(&self, item: &WorkItem, states: &HashMap<String, SchedState>) -> bool {
        item.depends_on.iter().all(|dep| {
            states
                .get(dep)
                .map(|s| matches!(s, SchedState::Terminal(_)))
                // Dependencies outside the selected set never block.
                .unwrap_or(true)
        })
    }

    fn failed_dependency(
        &self,
        item: &WorkItem,
        states: &HashMap<String, SchedState>,
    ) -> Option<String> {
        item.depends_on.iter().find_map(|dep| match states.get(dep) {
            Some(SchedState::Terminal(status)) if status.is_failure() => Some(dep.clone()),
            _ => None,
        })
    }
}

fn finished_event(result: &ToolResult) -> ProgressEvent {
    ProgressEvent::Finished {
        status: result.status,
        errors: result.error_count,
        warnings: result.warning_count,
    }
}

async fn run_one(
    item: WorkItem,
    launcher: Arc<dyn ToolLauncher>,
    semaphore: Arc<Semaphore>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> (String, ToolResult) {
    let name = item.tool.clone();
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return (
                name.clone(),
                ToolResult::skipped(&name, &item.target, "cancelled"),
            );
        }
    };

    // A cancellation that lands before the process starts is a plain skip.
    if cancel.is_cancelled() {
        return (
            name.clone(),
            ToolResult::skipped(&name, &item.target, "cancelled"),
        );
    }

    let request = match &item.request {
        Some(request) => request,
        None => {
            return (
                name.clone(),
                ToolResult::unavailable(&name, &item.target, "no execution strategy"),
            );
        }
    };

    sink.update(&name, ProgressEvent::Started);
    let before = snapshot_mtimes(&item.fix_probe);

    // A cancellation that lands from here on is the launcher's problem: it
    // SIGTERMs the tool's process group, reaps, and SIGKILLs after the
    // grace period, reporting the outcome as timed out.
    let outcome = launcher.launch(request, cancel).await;

    let result = match outcome {
        Ok(outcome) => {
            let fixed = detect_fix(&item, &before, &outcome);
            build_result(&item, outcome, fixed)
        }
        Err(error) => {
            // Spawn failure after a non-unavailable verdict: the binary
            // vanished between routing and launch.
            ToolResult::unavailable(&name, &item.target, error.to_string())
        }
    };
    sink.update(&name, finished_event(&result));
    (name, result)
}

fn build_result(item: &WorkItem, outcome: LaunchOutcome, fixed: Option<bool>) -> ToolResult {
    let status = if outcome.timed_out {
        ToolStatus::Timeout
    } else if outcome.success {
        ToolStatus::Success
    } else {
        ToolStatus::Failed
    };
    let (errors, warnings) = match status {
        ToolStatus::Failed => count_findings(&outcome),
        _ => (0, 0),
    };
    ToolResult {
        tool: item.tool.clone(),
        target: item.target.clone(),
        status,
        error_count: errors,
        warning_count: warnings,
        duration_ns: outcome.duration.as_nanos().min(u128::from(u64::MAX)) as u64,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        fixed,
        skip_reason: None,
    }
}

/// Linters overwhelmingly report one finding per line; count non-empty
/// lines, splitting off the ones that call themselves warnings.
fn count_findings(outcome: &LaunchOutcome) -> (u32, u32) {
    let text = if outcome.stdout.trim().is_empty() {
        &outcome.stderr
    } else {
        &outcome.stdout
    };
    let mut errors = 0u32;
    let mut warnings = 0u32;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if line.to_ascii_lowercase().contains("warning") {
            warnings += 1;
        } else {
            errors += 1;
        }
    }
    (errors.max(1), warnings)
}

fn snapshot_mtimes(paths: &[PathBuf]) -> Vec<Option<SystemTime>> {
    paths
        .iter()
        .map(|p| p.metadata().and_then(|m| m.modified()).ok())
        .collect()
}

fn detect_fix(
    item: &WorkItem,
    before: &[Option<SystemTime>],
    outcome: &LaunchOutcome,
) -> Option<bool> {
    if item.fix_probe.is_empty() || outcome.timed_out {
        return None;
    }
    let after = snapshot_mtimes(&item.fix_probe);
    Some(before.iter().zip(&after).any(|(a, b)| a != b))
}

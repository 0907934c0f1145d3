//! Result model, run-scoped aggregation, and the serialization surfaces.

pub mod human;
pub mod junit;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::warn;

use crate::mode::{Mode, OutputFormat};

/// Terminal status of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolStatus {
    Success,
    Failed,
    Skipped,
    Timeout,
    Unavailable,
}

impl ToolStatus {
    /// Failed and timed-out results make the run fail; the rest never do.
    pub fn is_failure(self) -> bool {
        matches!(self, ToolStatus::Failed | ToolStatus::Timeout)
    }
}

/// Outcome of one tool over one file batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolResult {
    pub tool: String,
    /// File path for single-file batches, `<batch>` otherwise.
    pub target: String,
    pub status: ToolStatus,
    pub error_count: u32,
    pub warning_count: u32,
    pub duration_ns: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// `Some(true)` iff the tool supports fixing and modified the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<bool>,
    /// Populated only for skipped/unavailable results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ToolResult {
    pub fn skipped(tool: &str, target: &str, reason: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            target: target.to_string(),
            status: ToolStatus::Skipped,
            error_count: 0,
            warning_count: 0,
            duration_ns: 0,
            stdout: String::new(),
            stderr: String::new(),
            fixed: None,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn unavailable(tool: &str, target: &str, reason: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Unavailable,
            ..Self::skipped(tool, target, reason)
        }
    }
}

/// Aggregated counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub unavailable: usize,
    pub errors: u64,
    pub warnings: u64,
    /// Sum of per-tool durations.
    pub duration_ns: u64,
    /// Wall clock of the whole run.
    pub wall_clock_ns: u64,
}

/// One orchestrator invocation, as persisted in the run store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Run {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the run is still executing.
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: Mode,
    pub targets: Vec<PathBuf>,
    pub selected: Vec<String>,
    pub results: Vec<ToolResult>,
    pub summary: RunSummary,
    pub success: bool,
}

/// Monotonic-timestamp run id with a random suffix to disambiguate
/// same-instant invocations.
pub fn new_run_id() -> String {
    let now = Utc::now();
    let suffix: u32 = std::process::id() ^ (now.timestamp_subsec_nanos().rotate_left(13));
    format!("{}-{:08x}", now.format("%Y%m%dT%H%M%S%.9f"), suffix)
}

/// Run-scoped result collection. Workers commit from any thread; the mutex
/// is held only across a single push.
pub struct Aggregator {
    results: Mutex<Vec<ToolResult>>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, result: ToolResult) {
        let mut results = self.results.lock();
        if results
            .iter()
            .any(|r| r.tool == result.tool && r.target == result.target)
        {
            warn!(tool = %result.tool, target = %result.target, "duplicate result dropped");
            return;
        }
        results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Snapshot of the committed results in completion order.
    pub fn results(&self) -> Vec<ToolResult> {
        self.results.lock().clone()
    }

    /// Close the run: stable ordering (failures first, then tool name, then
    /// target), summary, and the success verdict.
    pub fn finalize(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        mode: Mode,
        targets: Vec<PathBuf>,
        selected: Vec<String>,
    ) -> Run {
        let mut results = self.results.lock().clone();
        results.sort_by(|a, b| {
            b.status
                .is_failure()
                .cmp(&a.status.is_failure())
                .then_with(|| a.tool.cmp(&b.tool))
                .then_with(|| a.target.cmp(&b.target))
        });

        let finished_at = Utc::now();
        let summary = summarize(&results, started_at, finished_at);
        let success = results.iter().all(|r| !r.status.is_failure());
        Run {
            run_id,
            started_at,
            finished_at: Some(finished_at),
            mode,
            targets,
            selected,
            results,
            summary,
            success,
        }
    }
}

fn summarize(results: &[ToolResult], started: DateTime<Utc>, finished: DateTime<Utc>) -> RunSummary {
    let mut summary = RunSummary {
        total: results.len(),
        ..RunSummary::default()
    };
    for result in results {
        match result.status {
            ToolStatus::Success => summary.success += 1,
            ToolStatus::Failed => summary.failed += 1,
            ToolStatus::Skipped => summary.skipped += 1,
            ToolStatus::Timeout => summary.timeout += 1,
            ToolStatus::Unavailable => summary.unavailable += 1,
        }
        summary.errors += u64::from(result.error_count);
        summary.warnings += u64::from(result.warning_count);
        summary.duration_ns += result.duration_ns;
    }
    summary.wall_clock_ns = (finished - started)
        .num_nanoseconds()
        .map(|ns| ns.max(0) as u64)
        .unwrap_or(u64::MAX);
    summary
}

/// Serialize a run for the given surface.
pub fn serialize(run: &Run, format: OutputFormat, fixable: &BTreeSet<String>) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render(run, fixable)),
        OutputFormat::Minimal => Ok(render_minimal(run)),
        OutputFormat::JunitXml => junit::render(run),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(run)?),
        OutputFormat::Jsonrpc => render_jsonrpc_content(run),
    }
}

/// One line per failed or timed-out tool plus a summary line; nothing at all
/// on total success.
fn render_minimal(run: &Run) -> String {
    if run.success {
        return String::new();
    }
    let mut out = String::new();
    for result in run.results.iter().filter(|r| r.status.is_failure()) {
        let what = match result.status {
            ToolStatus::Timeout => "timed out".to_string(),
            _ => format!(
                "{} error{}",
                result.error_count,
                if result.error_count == 1 { "" } else { "s" }
            ),
        };
        out.push_str(&format!("{}: {} ({})\n", result.tool, what, result.target));
    }
    let failures = run.summary.failed + run.summary.timeout;
    out.push_str(&format!(
        "huskycat: {failures} of {} tool{} failed (run {})\n",
        run.summary.total,
        if run.summary.total == 1 { "" } else { "s" },
        run.run_id
    ));
    out
}

/// JSON-RPC tool-call payload: the agent-protocol text-block convention with
/// the serialized run inside.
fn render_jsonrpc_content(run: &Run) -> anyhow::Result<String> {
    let text = serde_json::to_string(run)?;
    let content = serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "isError": !run.success,
    });
    Ok(serde_json::to_string(&content)?)
}

//! Colored, column-aligned report for interactive terminals.

use anstyle::{AnsiColor, Style};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use super::{Run, ToolStatus};

const GREEN: Style = AnsiColor::Green.on_default();
const RED: Style = AnsiColor::Red.on_default();
const YELLOW: Style = AnsiColor::Yellow.on_default();
const DIM: Style = Style::new().dimmed();
const BOLD: Style = Style::new().bold();

fn status_cell(status: ToolStatus) -> (Style, &'static str) {
    match status {
        ToolStatus::Success => (GREEN, "ok"),
        ToolStatus::Failed => (RED, "failed"),
        ToolStatus::Timeout => (RED, "timeout"),
        ToolStatus::Skipped => (YELLOW, "skipped"),
        ToolStatus::Unavailable => (DIM, "unavailable"),
    }
}

/// Render the run report. `fixable` names tools whose findings `--fix` can
/// resolve; a failed result for one of them earns the hint line.
pub fn render(run: &Run, fixable: &BTreeSet<String>) -> String {
    let mut out = String::new();

    if run.results.is_empty() {
        out.push_str("Nothing to validate.\n");
        return out;
    }

    let name_width = run
        .results
        .iter()
        .map(|r| r.tool.len())
        .max()
        .unwrap_or(0)
        .max(4);

    for result in &run.results {
        let (style, word) = status_cell(result.status);
        let duration = humantime::format_duration(round_duration(result.duration_ns));
        let _ = write!(
            out,
            "{style}{word:>11}{style:#}  {:<name_width$}  {}",
            result.tool, result.target
        );
        match result.status {
            ToolStatus::Success => {
                let _ = write!(out, "  {DIM}{duration}{DIM:#}");
            }
            ToolStatus::Failed => {
                let _ = write!(
                    out,
                    "  {} error(s), {} warning(s) in {duration}",
                    result.error_count, result.warning_count
                );
            }
            ToolStatus::Timeout => {
                let _ = write!(out, "  deadline expired after {duration}");
            }
            ToolStatus::Skipped | ToolStatus::Unavailable => {
                if let Some(reason) = &result.skip_reason {
                    let _ = write!(out, "  {DIM}{reason}{DIM:#}");
                }
            }
        }
        out.push('\n');
        if result.fixed == Some(true) {
            let _ = writeln!(out, "{:>11}  {DIM}fixed in place{DIM:#}", "");
        }
    }

    out.push('\n');
    let s = &run.summary;
    let wall = humantime::format_duration(round_duration(s.wall_clock_ns));
    if run.success {
        let _ = writeln!(
            out,
            "{GREEN}{BOLD}✓{BOLD:#}{GREEN:#} {} tool(s) passed in {wall}",
            s.success
        );
    } else {
        let _ = writeln!(
            out,
            "{RED}{BOLD}✗{BOLD:#}{RED:#} {} of {} tool(s) failed ({} error(s), {} warning(s)) in {wall}",
            s.failed + s.timeout,
            s.total,
            s.errors,
            s.warnings
        );
        let hint_worthy = run
            .results
            .iter()
            .any(|r| r.status == ToolStatus::Failed && fixable.contains(&r.tool));
        if hint_worthy {
            let _ = writeln!(out, "{DIM}hint: rerun with --fix to let tools repair what they can{DIM:#}");
        }
    }
    out
}

/// Millisecond precision is plenty for display.
fn round_duration(ns: u64) -> Duration {
    Duration::from_millis(ns / 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::results::{Aggregator, ToolResult, new_run_id, tests::result};
    use chrono::Utc;

    fn render_plain(run: &Run, fixable: &BTreeSet<String>) -> String {
        render(run, fixable)
    }

    #[test]
    fn empty_run_reads_nothing_to_validate() {
        let aggregator = Aggregator::new();
        let run = aggregator.finalize(new_run_id(), Utc::now(), Mode::Cli, vec![], vec![]);
        assert!(render_plain(&run, &BTreeSet::new()).contains("Nothing to validate."));
    }

    #[test]
    fn failures_render_counts_and_hint() {
        let aggregator = Aggregator::new();
        aggregator.add(result("ruff-check", ToolStatus::Failed, 2));
        aggregator.add(result("mypy", ToolStatus::Success, 0));
        let run = aggregator.finalize(
            new_run_id(),
            Utc::now(),
            Mode::Cli,
            vec![],
            vec!["mypy".into(), "ruff-check".into()],
        );
        let fixable = BTreeSet::from(["ruff-check".to_string()]);
        let out = render_plain(&run, &fixable);
        assert!(out.contains("ruff-check"));
        assert!(out.contains("2 error(s)"));
        assert!(out.contains("--fix"));
        // Failed rows come before successes.
        assert!(out.find("ruff-check").unwrap() < out.find("mypy").unwrap());
    }

    #[test]
    fn skip_reason_is_shown() {
        let aggregator = Aggregator::new();
        aggregator.add(ToolResult::skipped("eslint", "<batch>", "dependency prettier failed"));
        let run = aggregator.finalize(new_run_id(), Utc::now(), Mode::Cli, vec![], vec!["eslint".into()]);
        assert!(render_plain(&run, &BTreeSet::new()).contains("dependency prettier failed"));
    }
}

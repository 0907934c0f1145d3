//! JUnit XML surface for CI systems.
//!
//! One `<testsuite>` per tool, one `<testcase>` per (tool, target).
//! Failed results carry `<failure>`, timeouts `<error>`, and both skipped
//! and unavailable results `<skipped>`.

use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::BTreeMap;

use super::{Run, ToolResult, ToolStatus};

pub fn render(run: &Run) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("failed to write xml declaration")?;

    let mut suites = BytesStart::new("testsuites");
    suites.push_attribute(("name", "huskycat"));
    suites.push_attribute(("id", run.run_id.as_str()));
    suites.push_attribute(("tests", run.summary.total.to_string().as_str()));
    suites.push_attribute((
        "failures",
        (run.summary.failed + run.summary.timeout).to_string().as_str(),
    ));
    writer.write_event(Event::Start(suites))?;

    let mut by_tool: BTreeMap<&str, Vec<&ToolResult>> = BTreeMap::new();
    for result in &run.results {
        by_tool.entry(result.tool.as_str()).or_default().push(result);
    }

    for (tool, results) in by_tool {
        let mut suite = BytesStart::new("testsuite");
        suite.push_attribute(("name", tool));
        suite.push_attribute(("tests", results.len().to_string().as_str()));
        let failures = results
            .iter()
            .filter(|r| r.status == ToolStatus::Failed)
            .count();
        let errors = results
            .iter()
            .filter(|r| r.status == ToolStatus::Timeout)
            .count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, ToolStatus::Skipped | ToolStatus::Unavailable))
            .count();
        suite.push_attribute(("failures", failures.to_string().as_str()));
        suite.push_attribute(("errors", errors.to_string().as_str()));
        suite.push_attribute(("skipped", skipped.to_string().as_str()));
        writer.write_event(Event::Start(suite))?;

        for result in results {
            let seconds = result.duration_ns as f64 / 1e9;
            let mut case = BytesStart::new("testcase");
            case.push_attribute(("name", result.target.as_str()));
            case.push_attribute(("classname", tool));
            case.push_attribute(("time", format!("{seconds:.3}").as_str()));

            match result.status {
                ToolStatus::Success => {
                    writer.write_event(Event::Empty(case))?;
                }
                ToolStatus::Failed => {
                    writer.write_event(Event::Start(case))?;
                    let mut failure = BytesStart::new("failure");
                    failure.push_attribute((
                        "message",
                        format!("{} error(s)", result.error_count).as_str(),
                    ));
                    writer.write_event(Event::Start(failure))?;
                    let detail = if result.stdout.is_empty() {
                        &result.stderr
                    } else {
                        &result.stdout
                    };
                    writer.write_event(Event::Text(BytesText::new(detail)))?;
                    writer.write_event(Event::End(BytesEnd::new("failure")))?;
                    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
                }
                ToolStatus::Timeout => {
                    writer.write_event(Event::Start(case))?;
                    let mut error = BytesStart::new("error");
                    error.push_attribute(("message", "tool deadline expired"));
                    writer.write_event(Event::Empty(error))?;
                    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
                }
                ToolStatus::Skipped | ToolStatus::Unavailable => {
                    writer.write_event(Event::Start(case))?;
                    let mut skip = BytesStart::new("skipped");
                    if let Some(reason) = &result.skip_reason {
                        skip.push_attribute(("message", reason.as_str()));
                    }
                    writer.write_event(Event::Empty(skip))?;
                    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
                }
            }
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;
    let bytes = writer.into_inner();
    String::from_utf8(bytes).context("junit output was not utf-8")
}

//! Product-mode detection and the per-mode policy object.
//!
//! One invocation resolves to exactly one mode. Detection reads an
//! [`EnvSnapshot`] instead of the process environment so tests never mutate
//! globals.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{ENV_MODE, ENV_NONBLOCKING, is_truthy};
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    GitHooksBlocking,
    GitHooksNonblocking,
    Ci,
    Cli,
    Pipeline,
    AgentRpc,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::GitHooksBlocking => "git-hooks-blocking",
            Mode::GitHooksNonblocking => "git-hooks-nonblocking",
            Mode::Ci => "ci",
            Mode::Cli => "cli",
            Mode::Pipeline => "pipeline",
            Mode::AgentRpc => "agent-rpc",
        }
    }

    pub fn parse(value: &str) -> Result<Self, OrchestratorError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "git-hooks-blocking" | "git-hooks" => Ok(Mode::GitHooksBlocking),
            "git-hooks-nonblocking" => Ok(Mode::GitHooksNonblocking),
            "ci" => Ok(Mode::Ci),
            "cli" => Ok(Mode::Cli),
            "pipeline" => Ok(Mode::Pipeline),
            "agent-rpc" | "mcp" => Ok(Mode::AgentRpc),
            other => Err(OrchestratorError::configuration(format!(
                "unrecognized mode `{other}`"
            ))),
        }
    }
}

/// Environment facts the detector consumes.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub vars: HashMap<String, String>,
    pub stdout_is_tty: bool,
    /// `huskycat.nonblocking` from repo git config.
    pub repo_nonblocking: bool,
}

impl EnvSnapshot {
    /// Capture the real process environment.
    pub fn capture(stdout_is_tty: bool, repo_nonblocking: bool) -> Self {
        Self {
            vars: std::env::vars().collect(),
            stdout_is_tty,
            repo_nonblocking,
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

const CI_MARKERS: &[&str] = &["CI", "GITLAB_CI", "GITHUB_ACTIONS", "JENKINS_URL"];
const GIT_HOOK_MARKERS: &[&str] = &["GIT_AUTHOR_NAME", "GIT_INDEX_FILE", "GIT_DIR"];

/// Resolve the product mode. Priority: explicit flag, `HUSKYCAT_MODE`,
/// `mcp-server` subcommand, CI markers, git-hook markers (with the
/// repository's nonblocking flag), tty-ness, `cli` fallback.
pub fn detect_mode(
    explicit: Option<Mode>,
    subcommand_is_mcp: bool,
    env: &EnvSnapshot,
) -> Result<Mode, OrchestratorError> {
    if let Some(mode) = explicit {
        return Ok(mode);
    }
    if let Some(value) = env.get(ENV_MODE) {
        return Mode::parse(value);
    }
    if subcommand_is_mcp {
        return Ok(Mode::AgentRpc);
    }
    if CI_MARKERS.iter().any(|key| env.get(key).is_some()) {
        return Ok(Mode::Ci);
    }
    if GIT_HOOK_MARKERS.iter().any(|key| env.get(key).is_some()) {
        let nonblocking = env
            .get(ENV_NONBLOCKING)
            .map(is_truthy)
            .unwrap_or(env.repo_nonblocking);
        return Ok(if nonblocking {
            Mode::GitHooksNonblocking
        } else {
            Mode::GitHooksBlocking
        });
    }
    if !env.stdout_is_tty {
        return Ok(Mode::Pipeline);
    }
    Ok(Mode::Cli)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Human,
    Minimal,
    JunitXml,
    Json,
    Jsonrpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interactivity {
    None,
    /// Only the prior-run prompt before forking.
    ConfirmOnly,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFilter {
    /// The fast subset wired into the blocking hook.
    Fast,
    /// Tools enabled by repository configuration.
    Configured,
    All,
}

/// Per-mode policy: how one run formats output, selects tools and reacts to
/// failure.
#[derive(Debug, Clone)]
pub struct ModeAdapter {
    pub mode: Mode,
    pub output: OutputFormat,
    pub interactivity: Interactivity,
    pub tool_filter: ToolFilter,
    pub fail_fast: bool,
    pub emit_progress: bool,
    /// Per-tool deadline override; `None` keeps the configured default.
    pub tool_timeout: Option<Duration>,
    /// Whole-run deadline; only CI sets one by default.
    pub run_deadline: Option<Duration>,
}

impl ModeAdapter {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::GitHooksBlocking => Self {
                mode,
                output: OutputFormat::Minimal,
                interactivity: Interactivity::None,
                tool_filter: ToolFilter::Fast,
                fail_fast: true,
                emit_progress: false,
                tool_timeout: None,
                run_deadline: None,
            },
            Mode::GitHooksNonblocking => Self {
                mode,
                output: OutputFormat::Minimal,
                interactivity: Interactivity::ConfirmOnly,
                tool_filter: ToolFilter::All,
                fail_fast: false,
                emit_progress: true,
                tool_timeout: None,
                run_deadline: None,
            },
            Mode::Ci => Self {
                mode,
                output: OutputFormat::JunitXml,
                interactivity: Interactivity::None,
                tool_filter: ToolFilter::All,
                fail_fast: false,
                emit_progress: false,
                tool_timeout: None,
                run_deadline: Some(Duration::from_secs(30 * 60)),
            },
            Mode::Cli => Self {
                mode,
                output: OutputFormat::Human,
                interactivity: Interactivity::Full,
                tool_filter: ToolFilter::Configured,
                fail_fast: false,
                emit_progress: true,
                tool_timeout: None,
                run_deadline: None,
            },
            Mode::Pipeline => Self {
                mode,
                output: OutputFormat::Json,
                interactivity: Interactivity::None,
                tool_filter: ToolFilter::All,
                fail_fast: false,
                emit_progress: false,
                tool_timeout: None,
                run_deadline: None,
            },
            Mode::AgentRpc => Self {
                mode,
                output: OutputFormat::Jsonrpc,
                interactivity: Interactivity::None,
                tool_filter: ToolFilter::All,
                fail_fast: false,
                emit_progress: false,
                tool_timeout: None,
                run_deadline: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &[(&str, &str)], tty: bool) -> EnvSnapshot {
        EnvSnapshot {
            vars: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            stdout_is_tty: tty,
            repo_nonblocking: false,
        }
    }

    #[test]
    fn explicit_flag_wins_over_everything() {
        let snapshot = env(&[("CI", "true"), ("HUSKYCAT_MODE", "pipeline")], true);
        let mode = detect_mode(Some(Mode::Cli), false, &snapshot).unwrap();
        assert_eq!(mode, Mode::Cli);
    }

    #[test]
    fn env_override_beats_ci_markers() {
        let snapshot = env(&[("CI", "true"), ("HUSKYCAT_MODE", "pipeline")], true);
        assert_eq!(detect_mode(None, false, &snapshot).unwrap(), Mode::Pipeline);
    }

    #[test]
    fn mcp_subcommand_resolves_agent_rpc() {
        let snapshot = env(&[("CI", "true")], true);
        assert_eq!(detect_mode(None, true, &snapshot).unwrap(), Mode::AgentRpc);
    }

    #[test]
    fn ci_markers_resolve_ci() {
        for marker in ["CI", "GITLAB_CI", "GITHUB_ACTIONS", "JENKINS_URL"] {
            let snapshot = env(&[(marker, "1")], true);
            assert_eq!(detect_mode(None, false, &snapshot).unwrap(), Mode::Ci);
        }
    }

    #[test]
    fn git_markers_resolve_hook_variants() {
        let snapshot = env(&[("GIT_INDEX_FILE", ".git/index")], false);
        assert_eq!(
            detect_mode(None, false, &snapshot).unwrap(),
            Mode::GitHooksBlocking
        );

        let mut snapshot = env(&[("GIT_DIR", ".git")], false);
        snapshot.repo_nonblocking = true;
        assert_eq!(
            detect_mode(None, false, &snapshot).unwrap(),
            Mode::GitHooksNonblocking
        );

        // Legacy env override flips the hook variant on its own.
        let snapshot = env(&[("GIT_DIR", ".git"), ("HUSKYCAT_NONBLOCKING", "1")], false);
        assert_eq!(
            detect_mode(None, false, &snapshot).unwrap(),
            Mode::GitHooksNonblocking
        );
    }

    #[test]
    fn non_tty_stdout_resolves_pipeline() {
        let snapshot = env(&[], false);
        assert_eq!(detect_mode(None, false, &snapshot).unwrap(), Mode::Pipeline);
    }

    #[test]
    fn tty_fallback_is_cli() {
        let snapshot = env(&[], true);
        assert_eq!(detect_mode(None, false, &snapshot).unwrap(), Mode::Cli);
    }

    #[test]
    fn empty_markers_are_ignored() {
        let snapshot = env(&[("CI", "")], true);
        assert_eq!(detect_mode(None, false, &snapshot).unwrap(), Mode::Cli);
    }

    #[test]
    fn bad_env_mode_is_a_configuration_error() {
        let snapshot = env(&[("HUSKYCAT_MODE", "warp-speed")], true);
        assert!(detect_mode(None, false, &snapshot).is_err());
    }

    #[test]
    fn adapter_table_matches_contract() {
        let hook = ModeAdapter::for_mode(Mode::GitHooksBlocking);
        assert!(hook.fail_fast);
        assert_eq!(hook.tool_filter, ToolFilter::Fast);
        assert_eq!(hook.output, OutputFormat::Minimal);

        let ci = ModeAdapter::for_mode(Mode::Ci);
        assert_eq!(ci.output, OutputFormat::JunitXml);
        assert!(!ci.fail_fast);
        assert!(ci.run_deadline.is_some());

        let cli = ModeAdapter::for_mode(Mode::Cli);
        assert_eq!(cli.interactivity, Interactivity::Full);
        assert!(cli.emit_progress);

        let pipeline = ModeAdapter::for_mode(Mode::Pipeline);
        assert_eq!(pipeline.output, OutputFormat::Json);
        assert_eq!(pipeline.tool_filter, ToolFilter::All);
    }
}

//! CLI argument parsing.

use clap::{Parser, Subcommand, ValueHint};
use huskycat_core::Mode;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "huskycat",
    version,
    about = "Multi-language validation orchestrator",
    long_about = "Routes external formatters, linters and scanners to an execution strategy, \
schedules them over a dependency DAG with per-tool deadlines, and persists run artifacts \
under .huskycat/runs/.",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Force a product mode instead of detecting one
    #[arg(long, global = true, value_enum)]
    pub mode: Option<Mode>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the given paths (default: repository root)
    Validate(ValidateArgs),

    /// Install Git hook shims into .git/hooks/
    SetupHooks {
        /// Replace hooks huskycat did not write
        #[arg(long)]
        force: bool,
    },

    /// Self-install the binary into ~/.local/bin
    Install,

    /// Start the agent RPC dispatcher on standard streams
    McpServer,

    /// Validate a single CI configuration file
    CiValidate {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Print detected mode, tool availability and storage locations
    Status,

    /// Garbage-collect the run store
    Clean {
        /// Remove the whole run store instead of applying retention
        #[arg(long)]
        all: bool,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Paths to validate
    #[arg(value_hint = ValueHint::AnyPath)]
    pub paths: Vec<PathBuf>,

    /// Limit validation to files staged for commit
    #[arg(long)]
    pub staged: bool,

    /// Let supports-fix tools modify files in place
    #[arg(long)]
    pub fix: bool,

    /// Run every matching tool, ignoring filters and disables
    #[arg(long)]
    pub all: bool,

    /// Emit the JSON surface regardless of mode
    #[arg(long)]
    pub json: bool,

    /// Internal: re-entry marker for the detached non-blocking child
    #[arg(long, hide = true, value_name = "RUN_ID")]
    pub child_run: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_parses_flags_and_paths() {
        let cli = Cli::parse_from(["huskycat", "validate", "--staged", "--fix", "a.py", "b.py"]);
        match cli.command {
            Commands::Validate(args) => {
                assert!(args.staged);
                assert!(args.fix);
                assert!(!args.all);
                assert_eq!(args.paths.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn mode_flag_is_global() {
        let cli = Cli::parse_from(["huskycat", "validate", "--mode", "pipeline", "."]);
        assert_eq!(cli.mode, Some(Mode::Pipeline));
    }

    #[test]
    fn child_run_flag_is_hidden_but_parses() {
        let cli = Cli::parse_from(["huskycat", "validate", "--child-run", "some-run-id"]);
        match cli.command {
            Commands::Validate(args) => {
                assert_eq!(args.child_run.as_deref(), Some("some-run-id"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        let help = Cli::command().render_long_help().to_string();
        assert!(!help.contains("child-run"));
    }
}

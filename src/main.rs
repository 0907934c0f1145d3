//! Huskycat - multi-language validation orchestrator.
//!
//! Thin binary entry point that delegates to modular CLI handlers.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use huskycat_commons::ExitCode;
use huskycat_core::OrchestratorError;

mod cli;
mod mcp;

use cli::args::{Cli, Commands};

fn main() -> std::process::ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::ConfigOrIo.into();
        }
    };

    match runtime.block_on(run()) {
        Ok(code) => code.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<OrchestratorError>()
                .map(OrchestratorError::exit_code)
                .unwrap_or(ExitCode::ConfigOrIo);
            code.into()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing();

    match args.command {
        Commands::Validate(validate_args) => cli::validate::run(validate_args, args.mode).await,
        Commands::SetupHooks { force } => cli::setup_hooks::run(force),
        Commands::Install => cli::install::run(),
        Commands::McpServer => mcp::server::run(args.mode).await,
        Commands::CiValidate { file } => cli::ci_validate::run(file).await,
        Commands::Status => cli::status::run(args.mode),
        Commands::Clean { all } => cli::clean::run(all),
    }
}

/// `HUSKYCAT_LOG` controls verbosity; logs go to stderr so structured
/// output surfaces stay clean.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env(huskycat_core::config::ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

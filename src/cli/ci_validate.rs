use anyhow::{Result, bail};
use huskycat_commons::ExitCode;
use huskycat_core::engine::{ValidationEngine, ValidationRequest};
use huskycat_core::mode::{Mode, ModeAdapter};
use huskycat_core::progress::NoopSink;
use huskycat_core::results;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::context::StartupContext;

/// Thin wrapper: route one CI configuration file through the normal engine
/// with the CI adapter.
pub async fn run(file: PathBuf) -> Result<ExitCode> {
    if !file.exists() {
        bail!("{} does not exist", file.display());
    }
    let context = StartupContext::resolve(Some(Mode::Ci), false)?;
    let adapter = ModeAdapter::for_mode(Mode::Ci);
    let engine = context.engine(adapter.clone())?;

    let request = ValidationRequest {
        targets: vec![file],
        ..ValidationRequest::default()
    };
    let run = engine
        .run(&request, Arc::new(NoopSink), CancellationToken::new())
        .await?;

    let rendered = results::serialize(&run, adapter.output, &engine.fixable_tools())?;
    print!("{rendered}");
    Ok(ValidationEngine::run_exit_code(&run))
}

use anyhow::Result;
use huskycat_commons::{ExitCode, discover_repo_root};

pub fn run(force: bool) -> Result<ExitCode> {
    let cwd = std::env::current_dir()?;
    let repo = discover_repo_root(&cwd);
    let installed = huskycat_core::git::install_hooks(&repo, force)?;
    for path in installed {
        println!("installed {}", path.display());
    }
    println!("hooks will run `huskycat validate --staged` before each commit");
    Ok(ExitCode::Success)
}

use anyhow::Result;
use huskycat_commons::{ExitCode, discover_repo_root};
use huskycat_core::config::HuskycatConfig;
use huskycat_core::store::RunStore;

/// Garbage-collect the run store; `--all` removes it entirely.
pub fn run(all: bool) -> Result<ExitCode> {
    let cwd = std::env::current_dir()?;
    let repo = discover_repo_root(&cwd);
    let config = HuskycatConfig::load(&repo.config_file())?;
    let store = RunStore::new(repo.runs_dir());

    if all {
        store.purge()?;
        println!("removed {}", store.root().display());
    } else {
        store.gc(config.store.retention_days);
        println!(
            "pruned runs older than {} day(s) in {}",
            config.store.retention_days,
            store.root().display()
        );
    }
    Ok(ExitCode::Success)
}

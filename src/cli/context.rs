//! Shared startup context for command handlers: repository discovery,
//! configuration, mode resolution, and engine assembly.

use anyhow::Result;
use huskycat_commons::{RepoLayout, discover_repo_root};
use huskycat_core::config::HuskycatConfig;
use huskycat_core::engine::ValidationEngine;
use huskycat_core::exec::{ProcessLauncher, ToolLauncher};
use huskycat_core::extractor;
use huskycat_core::git;
use huskycat_core::mode::{EnvSnapshot, Mode, ModeAdapter, detect_mode};
use huskycat_core::registry::ToolRegistry;
use huskycat_core::router::HostState;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub struct StartupContext {
    pub repo: RepoLayout,
    pub config: HuskycatConfig,
    pub mode: Mode,
    pub bundle_cache: Option<PathBuf>,
}

impl StartupContext {
    /// Resolve everything a command needs before the first tool runs.
    pub fn resolve(explicit_mode: Option<Mode>, subcommand_is_mcp: bool) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let repo = discover_repo_root(&cwd);
        let config = HuskycatConfig::load(&repo.config_file())?;

        let env = EnvSnapshot::capture(
            std::io::stdout().is_terminal(),
            git::repo_nonblocking_flag(&repo.root),
        );
        let mode = detect_mode(explicit_mode, subcommand_is_mcp, &env)?;

        // Extraction is best-effort: a read-only cache must not block
        // validation, only bundled verdicts.
        let bundle_cache = match extractor::default_cache_root() {
            Some(root) => match extractor::extract_bundle(&root) {
                Ok(cache) => cache,
                Err(error) => {
                    warn!(%error, "tool bundle extraction failed");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            repo,
            config,
            mode,
            bundle_cache,
        })
    }

    pub fn host_state(&self) -> HostState {
        HostState::detect(
            self.config.sandbox.clone(),
            self.bundle_cache.clone(),
            &self.repo.root,
        )
    }

    pub fn adapter(&self) -> ModeAdapter {
        ModeAdapter::for_mode(self.mode)
    }

    pub fn engine(&self, adapter: ModeAdapter) -> Result<ValidationEngine> {
        let launcher: Arc<dyn ToolLauncher> = Arc::new(ProcessLauncher);
        Ok(ValidationEngine::new(
            self.repo.clone(),
            self.config.clone(),
            adapter,
            ToolRegistry::builtin()?,
            self.host_state(),
            launcher,
        ))
    }
}

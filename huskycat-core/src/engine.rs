//! The validation engine: one entry point per run.
//!
//! Turns a request into target files, target files into routed work items,
//! work items into results, and results into a persisted [`Run`].

use anyhow::Result;
use chrono::Utc;
use huskycat_commons::{ExitCode, RepoLayout};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::HuskycatConfig;
use crate::error::OrchestratorError;
use crate::exec::{ExecutorConfig, LaunchRequest, ParallelExecutor, ToolLauncher, WorkItem};
use crate::git;
use crate::mode::{ModeAdapter, ToolFilter};
use crate::progress::ProgressSink;
use crate::registry::{FAST_TOOLS, Tool, ToolRegistry};
use crate::results::{Aggregator, Run, new_run_id};
use crate::router::{HostState, Verdict, route};
use crate::store::RunStore;

/// Directories never walked for validation targets.
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".huskycat",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
];

#[derive(Debug, Clone, Default)]
pub struct ValidationRequest {
    /// Paths to validate; empty means the repo root.
    pub targets: Vec<PathBuf>,
    /// Limit to files staged for commit.
    pub staged: bool,
    /// Invoke supports-fix tools in fix mode.
    pub fix: bool,
    /// Ignore tool filters and configuration disables.
    pub all: bool,
    /// Restrict the run to these tools (agent surface); empty means no
    /// restriction.
    pub only: Vec<String>,
    /// Re-use a run id minted by the non-blocking parent.
    pub run_id: Option<String>,
}

pub struct ValidationEngine {
    repo: RepoLayout,
    config: HuskycatConfig,
    adapter: ModeAdapter,
    registry: ToolRegistry,
    host: HostState,
    launcher: Arc<dyn ToolLauncher>,
    store: RunStore,
}

impl ValidationEngine {
    pub fn new(
        repo: RepoLayout,
        config: HuskycatConfig,
        adapter: ModeAdapter,
        registry: ToolRegistry,
        host: HostState,
        launcher: Arc<dyn ToolLauncher>,
    ) -> Self {
        let store = RunStore::new(repo.runs_dir());
        Self {
            repo,
            config,
            adapter,
            registry,
            host,
            launcher,
            store,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn repo(&self) -> &RepoLayout {
        &self.repo
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn host(&self) -> &HostState {
        &self.host
    }

    pub fn adapter(&self) -> &ModeAdapter {
        &self.adapter
    }

    /// Selected tools whose findings `--fix` can repair.
    pub fn fixable_tools(&self) -> BTreeSet<String> {
        self.registry
            .names()
            .filter(|name| {
                self.registry
                    .lookup(name)
                    .map(Tool::supports_fix)
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect()
    }

    /// Execute one full run: discover, select, route, schedule, persist.
    pub async fn run(
        &self,
        request: &ValidationRequest,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Run> {
        let started_at = Utc::now();
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(new_run_id);

        // Opportunistic housekeeping; never fatal.
        self.store.gc(self.config.store.retention_days);

        let files = self.discover_files(request)?;
        debug!(files = files.len(), "validation targets discovered");

        let items = self.plan(&files, request);
        let selected: Vec<String> = items.iter().map(|item| item.tool.clone()).collect();
        info!(%run_id, tools = selected.len(), "starting validation run");

        if let Some(deadline) = self.adapter.run_deadline {
            let watchdog = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!("run deadline expired; cancelling remaining tools");
                watchdog.cancel();
            });
        }

        let aggregator = Aggregator::new();
        let executor = ParallelExecutor::new(
            Arc::clone(&self.launcher),
            ExecutorConfig {
                workers: self.config.worker_count(),
                fail_fast: self.adapter.fail_fast,
            },
        );
        executor.execute(items, &aggregator, sink, cancel).await;

        let run = aggregator.finalize(
            run_id,
            started_at,
            self.adapter.mode,
            request.targets.clone(),
            selected,
        );

        // Failure to persist is an io error at finalization; the run itself
        // already happened.
        self.store.write_run(&run)?;
        self.store.write_last_run(&run)?;
        Ok(run)
    }

    /// Exit code for a finalized run: validation failures beat everything;
    /// a selection that exists but is entirely unavailable is a
    /// configuration problem.
    pub fn run_exit_code(run: &Run) -> ExitCode {
        if !run.success {
            return ExitCode::ValidationFailed;
        }
        if !run.results.is_empty() && run.summary.unavailable == run.summary.total {
            return ExitCode::ConfigOrIo;
        }
        ExitCode::Success
    }

    fn discover_files(&self, request: &ValidationRequest) -> Result<Vec<PathBuf>> {
        if request.staged {
            return git::staged_files(&self.repo);
        }

        let targets: Vec<PathBuf> = if request.targets.is_empty() {
            vec![self.repo.root.clone()]
        } else {
            let mut resolved = Vec::with_capacity(request.targets.len());
            for target in &request.targets {
                resolved.push(huskycat_commons::resolve_target_path(
                    &self.repo.root,
                    target,
                )?);
            }
            resolved
        };

        let mut files = Vec::new();
        for target in targets {
            if target.is_file() {
                files.push(self.relative(&target));
                continue;
            }
            let walker = WalkDir::new(&target).into_iter().filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !SKIP_DIRS.contains(&name))
                    .unwrap_or(true)
            });
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(error) => {
                        warn!(%error, "skipping unreadable entry");
                        continue;
                    }
                };
                if entry.file_type().is_file() {
                    files.push(self.relative(entry.path()));
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.repo.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Build routed work items for every selected tool, in registry level
    /// order.
    fn plan(&self, files: &[PathBuf], request: &ValidationRequest) -> Vec<WorkItem> {
        let timeout = self.adapter.tool_timeout.unwrap_or(self.config.tool_timeout());
        let mut items = Vec::new();

        for level in self.registry.levels() {
            for name in level {
                let tool = match self.registry.lookup(name) {
                    Some(tool) => tool,
                    None => continue,
                };
                if !request.only.is_empty() && !request.only.contains(name) {
                    continue;
                }
                if !request.all && !self.filter_allows(name) {
                    continue;
                }
                let matched: Vec<&PathBuf> =
                    files.iter().filter(|f| tool.matches(f.as_path())).collect();
                if matched.is_empty() {
                    continue;
                }

                let file_args: Vec<String> = matched
                    .iter()
                    .map(|f| f.display().to_string())
                    .collect();
                let target = if file_args.len() == 1 {
                    file_args[0].clone()
                } else {
                    "<batch>".to_string()
                };

                let fixing = request.fix && tool.supports_fix();
                let verdict = route(tool, &self.host);
                debug!(tool = %name, verdict = verdict.label(), "routed");

                let (launch, unavailable_reason) = match verdict.command_prefix() {
                    Some(prefix) => {
                        let mut argv = tool.build_argv(&file_args, fixing);
                        if !argv.is_empty() {
                            argv.splice(0..1, prefix);
                        }
                        (
                            Some(LaunchRequest {
                                tool: name.clone(),
                                argv,
                                cwd: self.repo.root.clone(),
                                timeout,
                                path_prepend: self.host.bundle_cache.clone(),
                            }),
                            None,
                        )
                    }
                    None => match verdict {
                        Verdict::Unavailable(reason) => (None, Some(reason)),
                        _ => (None, Some("no execution strategy".to_string())),
                    },
                };

                let fix_probe = if fixing {
                    matched.iter().map(|f| self.repo.root.join(f)).collect()
                } else {
                    Vec::new()
                };

                items.push(WorkItem {
                    tool: name.clone(),
                    depends_on: tool.depends_on.clone(),
                    estimated_cost: tool.estimated_cost,
                    target,
                    request: launch,
                    unavailable_reason,
                    fix_probe,
                });
            }
        }
        items
    }

    fn filter_allows(&self, name: &str) -> bool {
        match self.adapter.tool_filter {
            ToolFilter::Fast => FAST_TOOLS.contains(&name) && self.config.tool_enabled(name),
            ToolFilter::Configured => self.config.tool_enabled(name),
            ToolFilter::All => !self
                .config
                .validation
                .disabled
                .iter()
                .any(|t| t == name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::exec::{LaunchOutcome, LaunchRequest};
    use crate::mode::{Mode, ModeAdapter};
    use crate::progress::NoopSink;
    use crate::results::ToolStatus;
    use async_trait::async_trait;
    use huskycat_commons::discover_repo_root;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Launcher that answers from a table of (tool, exit-ok) pairs.
    struct TableLauncher {
        failures: Vec<String>,
        seen: Mutex<Vec<String>>,
    }

    impl TableLauncher {
        fn new(failures: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failures: failures.iter().map(|s| s.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl crate::exec::ToolLauncher for TableLauncher {
        async fn launch(
            &self,
            request: &LaunchRequest,
            _cancel: CancellationToken,
        ) -> anyhow::Result<LaunchOutcome> {
            self.seen.lock().push(request.tool.clone());
            let success = !self.failures.contains(&request.tool);
            Ok(LaunchOutcome {
                success,
                code: Some(i32::from(!success)),
                stdout: if success { String::new() } else { "finding".into() },
                stderr: String::new(),
                duration: std::time::Duration::from_millis(1),
                timed_out: false,
            })
        }
    }

    fn engine_in(dir: &Path, launcher: Arc<TableLauncher>) -> ValidationEngine {
        let repo = discover_repo_root(dir);
        let host = HostState {
            inside_sandbox: false,
            sandbox_reachable: false,
            sandbox: SandboxConfig::default(),
            bundle_cache: None,
            path_dirs: vec![fake_bin_dir(dir)],
            worktree: repo.root.clone(),
        };
        ValidationEngine::new(
            repo,
            HuskycatConfig::default(),
            ModeAdapter::for_mode(Mode::Pipeline),
            ToolRegistry::builtin().unwrap(),
            host,
            launcher,
        )
    }

    /// Fake executables so routing resolves local-path verdicts. The dir is
    /// named `target` so discovery never picks the fakes up as files.
    fn fake_bin_dir(dir: &Path) -> PathBuf {
        let bins = dir.join("target");
        std::fs::create_dir_all(&bins).unwrap();
        for name in ["ruff", "mypy", "prettier", "eslint", "shfmt", "actionlint", "gitleaks"] {
            let path = bins.join(name);
            std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
        bins
    }

    async fn run_engine(engine: &ValidationEngine, request: ValidationRequest) -> Run {
        engine
            .run(&request, Arc::new(NoopSink), CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_directory_selects_nothing_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path(), TableLauncher::new(&[]));
        let run = run_engine(&engine, ValidationRequest::default()).await;
        assert!(run.results.is_empty());
        assert!(run.success);
        assert_eq!(ValidationEngine::run_exit_code(&run).code(), 0);
    }

    #[tokio::test]
    async fn python_file_selects_the_python_chain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        let launcher = TableLauncher::new(&[]);
        let engine = engine_in(dir.path(), Arc::clone(&launcher));
        let run = run_engine(&engine, ValidationRequest::default()).await;

        assert!(run.selected.contains(&"ruff-format".to_string()));
        assert!(run.selected.contains(&"ruff-check".to_string()));
        assert!(run.selected.contains(&"mypy".to_string()));
        assert!(!run.selected.contains(&"eslint".to_string()));
        assert!(run.success);

        // Dependency order held at launch time.
        let seen = launcher.seen.lock();
        let position = |tool: &str| seen.iter().position(|t| t == tool).unwrap();
        assert!(position("ruff-format") < position("ruff-check"));
        assert!(position("ruff-check") < position("mypy"));
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents_and_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        let engine = engine_in(dir.path(), TableLauncher::new(&["ruff-format"]));
        let run = run_engine(&engine, ValidationRequest::default()).await;

        assert!(!run.success);
        assert_eq!(ValidationEngine::run_exit_code(&run).code(), 1);
        let by_name = |tool: &str| run.results.iter().find(|r| r.tool == tool).unwrap();
        assert_eq!(by_name("ruff-format").status, ToolStatus::Failed);
        assert_eq!(by_name("ruff-check").status, ToolStatus::Skipped);
        assert!(
            by_name("ruff-check")
                .skip_reason
                .as_deref()
                .unwrap()
                .contains("ruff-format")
        );
        assert_eq!(by_name("mypy").status, ToolStatus::Skipped);
    }

    #[tokio::test]
    async fn copyleft_tools_surface_unavailable_without_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "echo hi\n").unwrap();
        let engine = engine_in(dir.path(), TableLauncher::new(&[]));
        let run = run_engine(&engine, ValidationRequest::default()).await;

        let shellcheck = run.results.iter().find(|r| r.tool == "shellcheck").unwrap();
        assert_eq!(shellcheck.status, ToolStatus::Unavailable);
        // Unavailability never fails the run.
        assert!(run.success);
    }

    #[tokio::test]
    async fn run_is_persisted_with_last_run_pointer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        let engine = engine_in(dir.path(), TableLauncher::new(&[]));
        let run = run_engine(&engine, ValidationRequest::default()).await;

        let stored = engine.store().read_run(&run.run_id).unwrap();
        assert_eq!(stored, run);
        let pointer = engine.store().read_last_run().unwrap();
        assert_eq!(pointer.run_id, run.run_id);
        assert!(pointer.success);
    }

    #[tokio::test]
    async fn status_counts_partition_the_selection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("run.sh"), "echo hi\n").unwrap();
        let engine = engine_in(dir.path(), TableLauncher::new(&["ruff-format"]));
        let run = run_engine(&engine, ValidationRequest::default()).await;

        let s = &run.summary;
        assert_eq!(
            s.success + s.failed + s.skipped + s.timeout + s.unavailable,
            run.selected.len()
        );
    }

    #[tokio::test]
    async fn explicit_file_target_limits_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("web.ts"), "let x = 1\n").unwrap();
        let engine = engine_in(dir.path(), TableLauncher::new(&[]));
        let run = run_engine(
            &engine,
            ValidationRequest {
                targets: vec![PathBuf::from("app.py")],
                ..ValidationRequest::default()
            },
        )
        .await;
        assert!(run.selected.contains(&"ruff-check".to_string()));
        assert!(!run.selected.contains(&"eslint".to_string()));
    }

    #[tokio::test]
    async fn disabled_tools_are_filtered_unless_all() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        let launcher = TableLauncher::new(&[]);

        let repo = discover_repo_root(dir.path());
        let mut config = HuskycatConfig::default();
        config.validation.disabled = vec!["mypy".to_string()];
        let host = HostState {
            inside_sandbox: false,
            sandbox_reachable: false,
            sandbox: SandboxConfig::default(),
            bundle_cache: None,
            path_dirs: vec![fake_bin_dir(dir.path())],
            worktree: repo.root.clone(),
        };
        let engine = ValidationEngine::new(
            repo,
            config,
            ModeAdapter::for_mode(Mode::Pipeline),
            ToolRegistry::builtin().unwrap(),
            host,
            launcher,
        );

        let run = run_engine(&engine, ValidationRequest::default()).await;
        assert!(!run.selected.contains(&"mypy".to_string()));

        let run = run_engine(
            &engine,
            ValidationRequest {
                all: true,
                ..ValidationRequest::default()
            },
        )
        .await;
        assert!(run.selected.contains(&"mypy".to_string()));
    }
}

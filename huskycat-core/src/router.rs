//! Execution routing: which strategy runs a given tool on this host.
//!
//! The router is a pure function of `(tool, host state)`. It owns the license
//! policy; the executor only sees the verdict and the resolved command
//! vector. Copyleft tools never resolve to an in-process-adjacent strategy
//! (bundled copy or bare PATH binary) — they run behind a sandbox boundary
//! or not at all.

use std::path::{Path, PathBuf};

use crate::config::{ENV_SANDBOXED, SandboxConfig};
use crate::registry::{LicenseClass, Tool};

/// How a specific tool is to be invoked on the current host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Extracted embedded copy.
    Bundled(PathBuf),
    /// Binary found on PATH (or required on PATH inside a sandbox).
    LocalPath(PathBuf),
    /// Copyleft tool behind the sandbox boundary.
    SandboxedSidecar(Vec<String>),
    /// Permissive tool without a local install, delegated to a sandbox with
    /// the working tree mounted.
    SandboxedDelegation(Vec<String>),
    Unavailable(String),
}

impl Verdict {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Verdict::Unavailable(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Bundled(_) => "bundled",
            Verdict::LocalPath(_) => "local-path",
            Verdict::SandboxedSidecar(_) => "sandboxed-sidecar",
            Verdict::SandboxedDelegation(_) => "sandboxed-delegation",
            Verdict::Unavailable(_) => "unavailable",
        }
    }

    /// Argv prefix that replaces the tool name in the invocation template.
    pub fn command_prefix(&self) -> Option<Vec<String>> {
        match self {
            Verdict::Bundled(path) | Verdict::LocalPath(path) => {
                Some(vec![path.display().to_string()])
            }
            Verdict::SandboxedSidecar(prefix) | Verdict::SandboxedDelegation(prefix) => {
                Some(prefix.clone())
            }
            Verdict::Unavailable(_) => None,
        }
    }
}

/// Snapshot of everything routing depends on, taken once per run.
#[derive(Debug, Clone)]
pub struct HostState {
    /// This process is already inside a sandbox (sentinel file or marker env).
    pub inside_sandbox: bool,
    /// The container runtime is on PATH and answers `--version`.
    pub sandbox_reachable: bool,
    pub sandbox: SandboxConfig,
    /// Extraction cache directory, when extraction ran.
    pub bundle_cache: Option<PathBuf>,
    /// PATH entries for binary lookup.
    pub path_dirs: Vec<PathBuf>,
    /// Working tree mounted into delegated sandboxes.
    pub worktree: PathBuf,
}

impl HostState {
    /// Probe the current process environment.
    pub fn detect(sandbox: SandboxConfig, bundle_cache: Option<PathBuf>, worktree: &Path) -> Self {
        let path_dirs = split_path_env(std::env::var_os("PATH"));
        let inside_sandbox =
            std::env::var_os(ENV_SANDBOXED).is_some() || Path::new("/.dockerenv").exists();
        let sandbox_reachable = find_on_path(&path_dirs, &sandbox.runtime).is_some();
        Self {
            inside_sandbox,
            sandbox_reachable,
            sandbox,
            bundle_cache,
            path_dirs,
            worktree: worktree.to_path_buf(),
        }
    }

    fn sandbox_prefix(&self) -> Vec<String> {
        vec![
            self.sandbox.runtime.clone(),
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/work", self.worktree.display()),
            "-w".to_string(),
            "/work".to_string(),
            self.sandbox.image.clone(),
        ]
    }
}

/// Decide how `tool` runs on this host. First hit wins.
pub fn route(tool: &Tool, host: &HostState) -> Verdict {
    let binary = tool
        .invocation
        .first()
        .map(String::as_str)
        .unwrap_or(tool.name.as_str());

    // 1. Copyleft is sidecar-or-nothing.
    if tool.license == LicenseClass::Copyleft {
        if host.sandbox_reachable {
            let mut prefix = host.sandbox_prefix();
            prefix.push(binary.to_string());
            return Verdict::SandboxedSidecar(prefix);
        }
        return Verdict::Unavailable(format!(
            "`{}` is {} licensed and no sandbox runtime (`{}`) is reachable",
            tool.name,
            license_label(tool.license),
            host.sandbox.runtime
        ));
    }

    // 2. Inside a sandbox the tool must already be on PATH.
    if host.inside_sandbox {
        return match find_on_path(&host.path_dirs, binary) {
            Some(path) => Verdict::LocalPath(path),
            None => Verdict::Unavailable(format!(
                "`{binary}` not on PATH inside the sandbox"
            )),
        };
    }

    // 3. Extracted embedded copy.
    if let Some(cache) = &host.bundle_cache {
        let candidate = cache.join(binary);
        if is_executable(&candidate) {
            return Verdict::Bundled(candidate);
        }
    }

    // 4. Host PATH.
    if let Some(path) = find_on_path(&host.path_dirs, binary) {
        return Verdict::LocalPath(path);
    }

    // 5. Delegate to a sandbox with the working tree mounted.
    if host.sandbox_reachable {
        let mut prefix = host.sandbox_prefix();
        prefix.push(binary.to_string());
        return Verdict::SandboxedDelegation(prefix);
    }

    Verdict::Unavailable(format!("`{binary}` not installed and no sandbox runtime"))
}

fn license_label(license: LicenseClass) -> &'static str {
    match license {
        LicenseClass::Permissive => "permissively",
        LicenseClass::Copyleft => "copyleft",
        LicenseClass::Conditional => "conditionally",
    }
}

fn split_path_env(path: Option<std::ffi::OsString>) -> Vec<PathBuf> {
    path.map(|raw| std::env::split_paths(&raw).collect())
        .unwrap_or_default()
}

fn find_on_path(dirs: &[PathBuf], binary: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

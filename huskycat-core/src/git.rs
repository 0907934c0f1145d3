//! Git plumbing: staged-file listing, repo config flags, hook shims.
//!
//! Everything goes through the `git` binary; huskycat never parses the
//! object store itself.

use anyhow::{Context, Result, bail};
use huskycat_commons::RepoLayout;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::config::is_truthy;

/// Marker distinguishing huskycat's own shims from user hooks.
const SHIM_HEADER: &str = "# huskycat hook shim v1";

/// Files staged for commit, relative to the repo root.
pub fn staged_files(repo: &RepoLayout) -> Result<Vec<PathBuf>> {
    let output = Command::new("git")
        .args(["diff", "--cached", "--name-only", "--diff-filter=ACMR", "-z"])
        .current_dir(&repo.root)
        .output()
        .context("failed to run git diff --cached")?;
    if !output.status.success() {
        bail!(
            "git diff --cached failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// The `huskycat.nonblocking` repo config flag.
pub fn repo_nonblocking_flag(root: &Path) -> bool {
    let output = Command::new("git")
        .args(["config", "--get", "huskycat.nonblocking"])
        .current_dir(root)
        .output();
    match output {
        Ok(output) if output.status.success() => {
            is_truthy(String::from_utf8_lossy(&output.stdout).trim())
        }
        _ => false,
    }
}

/// Install the pre-commit and pre-push shims.
///
/// Refuses to clobber a hook huskycat did not write unless `force` is set.
pub fn install_hooks(repo: &RepoLayout, force: bool) -> Result<Vec<PathBuf>> {
    let hooks_dir = repo
        .hooks_dir()
        .context("not a git repository; nothing to hook into")?;
    std::fs::create_dir_all(&hooks_dir)
        .with_context(|| format!("failed to create {}", hooks_dir.display()))?;

    let mut installed = Vec::new();
    for (hook, args) in [("pre-commit", "validate --staged"), ("pre-push", "validate --all")] {
        let path = hooks_dir.join(hook);
        if path.exists() && !force {
            let existing = std::fs::read_to_string(&path).unwrap_or_default();
            if !existing.contains(SHIM_HEADER) {
                bail!(
                    "{} already has a {hook} hook; rerun with --force to replace it",
                    path.display()
                );
            }
        }
        std::fs::write(&path, shim_script(args))
            .with_context(|| format!("failed to write {}", path.display()))?;
        set_executable(&path)?;
        debug!(hook, path = %path.display(), "installed hook shim");
        installed.push(path);
    }
    Ok(installed)
}

/// Short POSIX script that finds the binary and forwards the exit code.
fn shim_script(args: &str) -> String {
    format!(
        "#!/bin/sh\n{SHIM_HEADER}\nif command -v huskycat >/dev/null 2>&1; then\n  exec huskycat {args}\nfi\nif [ -x \"$HOME/.local/bin/huskycat\" ]; then\n  exec \"$HOME/.local/bin/huskycat\" {args}\nfi\necho 'huskycat: binary not found; skipping validation' >&2\nexit 0\n"
    )
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use huskycat_commons::discover_repo_root;

    fn git_repo() -> (tempfile::TempDir, RepoLayout) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let layout = discover_repo_root(dir.path());
        (dir, layout)
    }

    #[test]
    fn install_writes_both_shims() {
        let (_dir, repo) = git_repo();
        let installed = install_hooks(&repo, false).unwrap();
        assert_eq!(installed.len(), 2);
        let pre_commit = std::fs::read_to_string(&installed[0]).unwrap();
        assert!(pre_commit.contains("validate --staged"));
        assert!(pre_commit.contains(SHIM_HEADER));
        let pre_push = std::fs::read_to_string(&installed[1]).unwrap();
        assert!(pre_push.contains("validate --all"));
    }

    #[test]
    fn reinstall_over_own_shim_is_fine() {
        let (_dir, repo) = git_repo();
        install_hooks(&repo, false).unwrap();
        install_hooks(&repo, false).unwrap();
    }

    #[test]
    fn foreign_hook_requires_force() {
        let (_dir, repo) = git_repo();
        let hooks = repo.hooks_dir().unwrap();
        std::fs::create_dir_all(&hooks).unwrap();
        std::fs::write(hooks.join("pre-commit"), "#!/bin/sh\necho mine\n").unwrap();

        let err = install_hooks(&repo, false).unwrap_err();
        assert!(err.to_string().contains("--force"));

        install_hooks(&repo, true).unwrap();
        let replaced = std::fs::read_to_string(hooks.join("pre-commit")).unwrap();
        assert!(replaced.contains(SHIM_HEADER));
    }

    #[test]
    fn non_git_dir_cannot_install_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = discover_repo_root(dir.path());
        assert!(install_hooks(&layout, false).is_err());
    }
}

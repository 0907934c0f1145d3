use std::path::{Path, PathBuf};

/// Filesystem locations huskycat cares about inside one repository.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    pub root: PathBuf,
    pub git_dir: Option<PathBuf>,
}

impl RepoLayout {
    /// Root of the huskycat state directory (`<repo>/.huskycat`).
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".huskycat")
    }

    /// Directory holding persisted runs, logs and pid files.
    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    /// Path of the repository-local config file.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(".huskycat.toml")
    }

    pub fn hooks_dir(&self) -> Option<PathBuf> {
        self.git_dir.as_ref().map(|g| g.join("hooks"))
    }
}

/// Walk upward from `start` until a `.git` entry is found.
///
/// Falls back to `start` itself for non-git directories; validation still
/// works there, only hook installation and staged-file listing need git.
pub fn discover_repo_root(start: &Path) -> RepoLayout {
    let mut current = Some(start);
    while let Some(dir) = current {
        let git_entry = dir.join(".git");
        if git_entry.is_dir() {
            return RepoLayout {
                root: dir.to_path_buf(),
                git_dir: Some(git_entry),
            };
        }
        // Worktrees and submodules keep a `.git` file pointing at the real dir.
        if git_entry.is_file() {
            return RepoLayout {
                root: dir.to_path_buf(),
                git_dir: resolve_git_file(&git_entry),
            };
        }
        current = dir.parent();
    }

    RepoLayout {
        root: start.to_path_buf(),
        git_dir: None,
    }
}

fn resolve_git_file(git_file: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(git_file).ok()?;
    let target = contents.strip_prefix("gitdir:")?.trim();
    let path = Path::new(target);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        git_file.parent().map(|p| crate::normalize_path(&p.join(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_root_from_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let layout = discover_repo_root(&nested);
        assert_eq!(layout.root, dir.path());
        assert!(layout.git_dir.is_some());
    }

    #[test]
    fn non_git_dir_is_its_own_root() {
        let dir = tempfile::tempdir().unwrap();
        let layout = discover_repo_root(dir.path());
        assert_eq!(layout.root, dir.path());
        assert!(layout.git_dir.is_none());
    }

    #[test]
    fn worktree_git_file_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real-gitdir");
        std::fs::create_dir(&real).unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir(&tree).unwrap();
        std::fs::write(
            tree.join(".git"),
            format!("gitdir: {}\n", real.display()),
        )
        .unwrap();

        let layout = discover_repo_root(&tree);
        assert_eq!(layout.root, tree);
        assert_eq!(layout.git_dir.unwrap(), real);
    }
}

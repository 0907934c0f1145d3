use anyhow::{Context, Result, bail};
use std::path::{Component, Path, PathBuf};

/// Normalize a path by resolving `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Resolve a user-supplied target path against a repository root.
///
/// Relative paths are joined onto the root; the result must exist and must
/// not escape the root after canonicalization.
pub fn resolve_target_path(repo_root: &Path, user_path: &Path) -> Result<PathBuf> {
    let candidate = if user_path.is_absolute() {
        user_path.to_path_buf()
    } else {
        repo_root.join(user_path)
    };

    let canonical = candidate
        .canonicalize()
        .with_context(|| format!("failed to canonicalize `{}`", candidate.display()))?;

    let root_canonical = repo_root
        .canonicalize()
        .with_context(|| format!("failed to canonicalize `{}`", repo_root.display()))?;

    if !canonical.starts_with(&root_canonical) {
        bail!(
            "path `{}` escapes repository root `{}`",
            canonical.display(),
            root_canonical.display()
        );
    }

    Ok(canonical)
}

//! First-run extraction of embedded auxiliary tool binaries.
//!
//! Release binaries ship a bundle of helper tools. On start the bundle is
//! unpacked once per (bundle version, user) into a user-scoped cache which
//! the router checks before PATH. Concurrent first runs coordinate through
//! an exclusive file lock; waiters re-check the version stamp after
//! acquiring it and skip the copy when another process already finished.

use anyhow::{Context, Result};
use fs2::FileExt;
use include_dir::{Dir, include_dir};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

static BUNDLE: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/assets/bundled");

const VERSION_FILE: &str = ".version";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Deserialize)]
struct BundleManifest {
    version: String,
    tools: Vec<String>,
}

/// Default user-scoped cache root for extracted tools.
pub fn default_cache_root() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("huskycat").join("tools"))
}

/// Unpack the embedded bundle into `cache_root` if its version differs from
/// the cached stamp. Returns the cache root when a bundle is present, `None`
/// for builds without embedded tools.
pub fn extract_bundle(cache_root: &Path) -> Result<Option<PathBuf>> {
    let manifest = match BUNDLE.get_file("manifest.json") {
        Some(file) => file,
        None => return Ok(None),
    };
    let manifest: BundleManifest = serde_json::from_slice(manifest.contents())
        .context("embedded bundle manifest is malformed")?;

    let mut entries = Vec::with_capacity(manifest.tools.len());
    for name in &manifest.tools {
        let file = BUNDLE
            .get_file(name)
            .with_context(|| format!("bundle manifest names missing tool `{name}`"))?;
        entries.push((name.as_str(), file.contents()));
    }

    extract_entries(cache_root, &manifest.version, &entries)?;
    Ok(Some(cache_root.to_path_buf()))
}

/// Lock, version-gate, and copy. Split from [`extract_bundle`] so tests can
/// drive it with arbitrary payloads.
fn extract_entries(cache_root: &Path, version: &str, entries: &[(&str, &[u8])]) -> Result<()> {
    fs::create_dir_all(cache_root)
        .with_context(|| format!("failed to create {}", cache_root.display()))?;

    let lock_path = cache_root.join(LOCK_FILE);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;
    lock.lock_exclusive()
        .with_context(|| format!("failed to lock {}", lock_path.display()))?;

    let result = extract_locked(cache_root, version, entries);
    let _ = fs2::FileExt::unlock(&lock);
    result
}

fn extract_locked(cache_root: &Path, version: &str, entries: &[(&str, &[u8])]) -> Result<()> {
    let version_path = cache_root.join(VERSION_FILE);
    // Re-check under the lock: another process may have finished extraction
    // while we waited.
    if let Ok(cached) = fs::read_to_string(&version_path) {
        if cached.trim() == version {
            debug!(version, "tool bundle already extracted");
            return Ok(());
        }
    }

    for (name, contents) in entries {
        let target = cache_root.join(name);
        write_atomic(cache_root, &target, contents)?;
        set_executable(&target)?;
        debug!(tool = *name, "extracted bundled tool");
    }

    write_atomic(cache_root, &version_path, version.as_bytes())?;
    Ok(())
}

/// Temp file in the destination directory, then rename.
fn write_atomic(dir: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(contents)
        .with_context(|| format!("failed to write {}", target.display()))?;
    temp.persist(target)
        .with_context(|| format!("failed to move temp file to {}", target.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

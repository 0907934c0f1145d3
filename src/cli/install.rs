use anyhow::{Context, Result};
use huskycat_commons::ExitCode;
use std::path::PathBuf;

/// Copy the running binary into a user bin directory.
pub fn run() -> Result<ExitCode> {
    let exe = std::env::current_exe().context("cannot locate own binary")?;
    let bin_dir = user_bin_dir().context("cannot resolve a user bin directory")?;
    std::fs::create_dir_all(&bin_dir)
        .with_context(|| format!("failed to create {}", bin_dir.display()))?;

    let target = bin_dir.join("huskycat");
    std::fs::copy(&exe, &target)
        .with_context(|| format!("failed to copy binary to {}", target.display()))?;
    set_executable(&target)?;
    println!("installed {}", target.display());

    let on_path = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).any(|dir| dir == bin_dir))
        .unwrap_or(false);
    if !on_path {
        eprintln!(
            "warning: {} is not on PATH; add it to your shell profile",
            bin_dir.display()
        );
    }
    Ok(ExitCode::Success)
}

fn user_bin_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".local").join("bin"))
}

#[cfg(unix)]
fn set_executable(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

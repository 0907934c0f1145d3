//! Append-only run store under `<repo>/.huskycat/runs/`.
//!
//! Layout:
//!
//! ```text
//! pids/<pid>.json     pid files for live (or crashed) non-blocking children
//! logs/<run-id>.log   raw captured output
//! <run-id>.json       serialized runs
//! last_run.json       pointer to the most recently finalized run
//! ```
//!
//! Every write is temp-file-then-rename; readers retry once on a parse
//! failure so a reader racing a writer never sees a hard error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::mode::Mode;
use crate::results::Run;

/// Ownership contract: written by the non-blocking parent at spawn time,
/// deleted by the child on exit; stale files are reaped by any later run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PidFile {
    pub run_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub mode: Mode,
    pub parent_pid: u32,
}

/// Pointer to the most recently finalized run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LastRunPointer {
    pub run_id: String,
    pub success: bool,
    pub finished_at: DateTime<Utc>,
}

/// What a new invocation can say about the previous one.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorOutcome {
    /// No prior run on record.
    None,
    /// Prior run finished cleanly.
    Succeeded,
    Failed(LastRunPointer),
    /// A child died mid-run: pid file without a finalized snapshot.
    Incomplete { run_id: String },
    /// A non-blocking child is still running right now.
    StillRunning { run_id: String, pid: u32 },
}

pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: PathBuf) -> Self {
        Self { root: runs_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("pids")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}.json"))
    }

    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{run_id}.log"))
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.root.join("last_run.json")
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [self.root.clone(), self.pids_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|e| OrchestratorError::io(format!("failed to create {}: {e}", dir.display())))?;
        }
        // The state directory keeps itself out of version control.
        if let Some(state_dir) = self.root.parent() {
            let marker = state_dir.join(".gitignore");
            if !marker.exists() {
                let _ = fs::write(marker, "*\n");
            }
        }
        Ok(())
    }

    pub fn write_pid_file(&self, pid_file: &PidFile) -> Result<PathBuf> {
        self.ensure_layout()?;
        let path = self.pids_dir().join(format!("{}.json", pid_file.pid));
        write_json_atomic(&path, pid_file)?;
        Ok(path)
    }

    pub fn remove_pid_file(&self, pid: u32) {
        let path = self.pids_dir().join(format!("{pid}.json"));
        if let Err(error) = fs::remove_file(&path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(%error, path = %path.display(), "failed to remove pid file");
            }
        }
    }

    /// All parsable pid files, live or stale.
    pub fn pid_files(&self) -> Vec<PidFile> {
        let mut found = Vec::new();
        let entries = match fs::read_dir(self.pids_dir()) {
            Ok(entries) => entries,
            Err(_) => return found,
        };
        for entry in entries.flatten() {
            match read_json_with_retry::<PidFile>(&entry.path()) {
                Ok(pid_file) => found.push(pid_file),
                Err(error) => {
                    warn!(%error, path = %entry.path().display(), "unparsable pid file");
                }
            }
        }
        found
    }

    pub fn write_run(&self, run: &Run) -> Result<()> {
        self.ensure_layout()?;
        write_json_atomic(&self.run_path(&run.run_id), run)
    }

    pub fn read_run(&self, run_id: &str) -> Result<Run> {
        read_json_with_retry(&self.run_path(run_id))
    }

    pub fn write_last_run(&self, run: &Run) -> Result<()> {
        let pointer = LastRunPointer {
            run_id: run.run_id.clone(),
            success: run.success,
            finished_at: run.finished_at.unwrap_or_else(Utc::now),
        };
        write_json_atomic(&self.last_run_path(), &pointer)
    }

    pub fn read_last_run(&self) -> Option<LastRunPointer> {
        let path = self.last_run_path();
        if !path.exists() {
            return None;
        }
        read_json_with_retry(&path).ok()
    }

    /// Classify the previous run for the supervisor's CHECK-PRIOR step.
    pub fn prior_outcome(&self) -> PriorOutcome {
        // A live child wins over everything: the user is mid-validation.
        for pid_file in self.pid_files() {
            if huskycat_tool_runner::is_pid_alive(pid_file.pid) {
                return PriorOutcome::StillRunning {
                    run_id: pid_file.run_id,
                    pid: pid_file.pid,
                };
            }
            // Dead child: did it finalize before dying?
            if !self.run_path(&pid_file.run_id).exists() {
                return PriorOutcome::Incomplete {
                    run_id: pid_file.run_id,
                };
            }
        }

        match self.read_last_run() {
            None => PriorOutcome::None,
            Some(pointer) if pointer.success => PriorOutcome::Succeeded,
            Some(pointer) => PriorOutcome::Failed(pointer),
        }
    }

    /// Drop runs older than the retention window and pid files whose pids
    /// are gone. Invoked at the start of every run.
    pub fn gc(&self, retention_days: u32) {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || name == "last_run.json" {
                continue;
            }
            let expired = match read_json_with_retry::<Run>(&path) {
                Ok(run) => run
                    .finished_at
                    .map(|finished| finished < cutoff)
                    .unwrap_or(false),
                // Unreadable snapshots age out by mtime.
                Err(_) => file_older_than(&path, cutoff),
            };
            if expired {
                debug!(path = %path.display(), "gc: removing expired run");
                let _ = fs::remove_file(&path);
                let run_id = name.trim_end_matches(".json");
                let _ = fs::remove_file(self.log_path(run_id));
            }
        }

        for pid_file in self.pid_files() {
            if !huskycat_tool_runner::is_pid_alive(pid_file.pid) {
                // Keep the marker for an unfinalized run until prior_outcome
                // has had a chance to report it, unless it also expired.
                let finalized = self.run_path(&pid_file.run_id).exists();
                if finalized || pid_file.started_at < cutoff {
                    debug!(pid = pid_file.pid, "gc: reaping stale pid file");
                    self.remove_pid_file(pid_file.pid);
                }
            }
        }
    }

    /// Remove the whole store (`clean --all`).
    pub fn purge(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .map_err(|e| OrchestratorError::io(format!("failed to purge run store: {e}")))?;
        }
        Ok(())
    }
}

fn file_older_than(path: &Path, cutoff: DateTime<Utc>) -> bool {
    path.metadata()
        .and_then(|m| m.modified())
        .map(|mtime| DateTime::<Utc>::from(mtime) < cutoff)
        .unwrap_or(false)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .context("store path has no parent directory")?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| OrchestratorError::io(format!("failed to create temp file in {}: {e}", dir.display())))?;
    let payload = serde_json::to_vec_pretty(value)?;
    temp.write_all(&payload)
        .and_then(|()| temp.flush())
        .map_err(|e| OrchestratorError::io(format!("failed to write {}: {e}", path.display())))?;
    temp.persist(path)
        .map_err(|e| OrchestratorError::io(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

/// Tolerate a partial write by retrying once after a short pause.
fn read_json_with_retry<T: DeserializeOwned>(path: &Path) -> Result<T> {
    match try_read_json(path) {
        Ok(value) => Ok(value),
        Err(_) => {
            std::thread::sleep(std::time::Duration::from_millis(20));
            try_read_json(path)
        }
    }
}

fn try_read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)
        .map_err(|e| OrchestratorError::io(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&raw)
        .map_err(|e| OrchestratorError::io(format!("failed to parse {}: {e}", path.display())).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Aggregator, ToolStatus, new_run_id, tests::result};
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, RunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs"));
        store.ensure_layout().unwrap();
        (dir, store)
    }

    fn finalized_run(success: bool) -> Run {
        let aggregator = Aggregator::new();
        aggregator.add(result(
            "mypy",
            if success {
                ToolStatus::Success
            } else {
                ToolStatus::Failed
            },
            u32::from(!success),
        ));
        aggregator.finalize(
            new_run_id(),
            Utc::now(),
            Mode::Cli,
            vec![],
            vec!["mypy".into()],
        )
    }

    #[test]
    fn run_round_trips_through_disk() {
        let (_dir, store) = store();
        let run = finalized_run(true);
        store.write_run(&run).unwrap();
        assert_eq!(store.read_run(&run.run_id).unwrap(), run);
    }

    #[test]
    fn last_run_pointer_tracks_outcome() {
        let (_dir, store) = store();
        assert!(store.read_last_run().is_none());
        assert_eq!(store.prior_outcome(), PriorOutcome::None);

        let run = finalized_run(false);
        store.write_run(&run).unwrap();
        store.write_last_run(&run).unwrap();

        let pointer = store.read_last_run().unwrap();
        assert_eq!(pointer.run_id, run.run_id);
        assert!(!pointer.success);
        assert!(matches!(store.prior_outcome(), PriorOutcome::Failed(_)));
    }

    #[test]
    fn dead_pid_without_snapshot_reads_incomplete() {
        let (_dir, store) = store();
        store
            .write_pid_file(&PidFile {
                run_id: "interrupted-run".to_string(),
                pid: 2_000_000_000,
                started_at: Utc::now(),
                mode: Mode::GitHooksNonblocking,
                parent_pid: 1,
            })
            .unwrap();
        assert_eq!(
            store.prior_outcome(),
            PriorOutcome::Incomplete {
                run_id: "interrupted-run".to_string()
            }
        );
    }

    #[test]
    fn live_pid_reads_still_running() {
        let (_dir, store) = store();
        store
            .write_pid_file(&PidFile {
                run_id: "current".to_string(),
                pid: std::process::id(),
                started_at: Utc::now(),
                mode: Mode::GitHooksNonblocking,
                parent_pid: 1,
            })
            .unwrap();
        assert!(matches!(
            store.prior_outcome(),
            PriorOutcome::StillRunning { pid, .. } if pid == std::process::id()
        ));
    }

    #[test]
    fn gc_reaps_expired_runs_and_stale_pids() {
        let (_dir, store) = store();
        let mut old_run = finalized_run(true);
        old_run.finished_at = Some(Utc::now() - chrono::Duration::days(30));
        store.write_run(&old_run).unwrap();
        std::fs::write(store.log_path(&old_run.run_id), "log").unwrap();

        let fresh_run = finalized_run(true);
        store.write_run(&fresh_run).unwrap();

        store
            .write_pid_file(&PidFile {
                run_id: fresh_run.run_id.clone(),
                pid: 2_000_000_001,
                started_at: Utc::now(),
                mode: Mode::GitHooksNonblocking,
                parent_pid: 1,
            })
            .unwrap();

        store.gc(7);

        assert!(!store.run_path(&old_run.run_id).exists());
        assert!(!store.log_path(&old_run.run_id).exists());
        assert!(store.run_path(&fresh_run.run_id).exists());
        // Finalized run + dead pid: the marker is reaped.
        assert!(store.pid_files().is_empty());
    }

    #[test]
    fn unparsable_reads_are_io_errors_after_one_retry() {
        let (_dir, store) = store();
        std::fs::write(store.run_path("broken"), "{not json").unwrap();
        let err = store.read_run("broken").unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn pid_file_removal_is_idempotent() {
        let (_dir, store) = store();
        store.remove_pid_file(12345);
    }
}

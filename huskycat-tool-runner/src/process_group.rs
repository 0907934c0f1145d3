//! Process-group primitives for tool subprocesses.
//!
//! Every tool is spawned as the leader of its own process group so a
//! deadline or cancellation can take out the tool and anything it spawned,
//! not just the direct child. Termination is always staged the same way:
//! SIGTERM to the group, a bounded wait for the leader to disappear, SIGKILL
//! for whatever is left. On non-Unix platforms these helpers degrade to
//! no-ops and deadline enforcement falls back to killing the direct child.

use std::io;
use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;

/// How a staged termination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The group went away within the grace window after SIGTERM.
    Exited,
    /// The grace window lapsed and the group was SIGKILLed.
    Killed,
    /// No process was running under that pid to begin with.
    NotRunning,
}

#[cfg(unix)]
mod sys {
    use std::io;

    /// What signal 0 can tell us about a pid.
    pub(super) enum Probe {
        Alive,
        /// Exists but owned by someone else; counts as alive.
        Denied,
        Gone,
    }

    pub(super) fn probe_pid(pid: u32) -> Probe {
        match unsafe { libc::kill(pid as libc::pid_t, 0) } {
            0 => Probe::Alive,
            _ => match io::Error::last_os_error().raw_os_error() {
                Some(libc::EPERM) => Probe::Denied,
                _ => Probe::Gone,
            },
        }
    }

    /// Deliver `signal` to a whole group. `Ok(false)` means the group had
    /// already dissolved, which is never an error for our callers.
    pub(super) fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<bool> {
        match unsafe { libc::killpg(pgid, signal) } {
            0 => Ok(true),
            _ => {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::ESRCH) => Ok(false),
                    _ => Err(err),
                }
            }
        }
    }
}

/// Put the calling process into its own process group.
///
/// Intended for `pre_exec`, so the child becomes the group leader.
#[cfg(unix)]
pub fn set_process_group() -> io::Result<()> {
    match unsafe { libc::setpgid(0, 0) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

#[cfg(not(unix))]
pub fn set_process_group() -> io::Result<()> {
    Ok(())
}

/// Start a new session, detaching from the controlling terminal.
///
/// Used by the non-blocking supervisor child so shell job control cannot
/// reach it.
#[cfg(unix)]
pub fn detach_from_tty() -> io::Result<()> {
    if unsafe { libc::setsid() } != -1 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // Already leading a session; a fresh process group is enough.
        Some(libc::EPERM) => set_process_group(),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
pub fn detach_from_tty() -> io::Result<()> {
    Ok(())
}

/// Liveness probe. A pid we may not signal still counts as alive.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    !matches!(sys::probe_pid(pid), sys::Probe::Gone)
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    false
}

/// Tear down the process group that `pid` leads.
///
/// SIGTERM first so tools can flush partial output, then up to `grace` of
/// waiting for the leader to vanish, then SIGKILL for holdouts. The caller
/// is expected to reap the child concurrently; an unreaped zombie keeps the
/// leader visible and pushes the outcome toward [`TerminationOutcome::Killed`].
#[cfg(unix)]
pub fn terminate_group(pid: u32, grace: Duration) -> io::Result<TerminationOutcome> {
    let pgid = match unsafe { libc::getpgid(pid as libc::pid_t) } {
        -1 => return Ok(TerminationOutcome::NotRunning),
        pgid => pgid,
    };

    if !sys::signal_group(pgid, libc::SIGTERM)? {
        return Ok(TerminationOutcome::NotRunning);
    }

    if wait_for_exit(pid, grace) {
        return Ok(TerminationOutcome::Exited);
    }

    // `false` here means the group dissolved between the last probe and the
    // kill, which is still a graceful exit.
    if sys::signal_group(pgid, libc::SIGKILL)? {
        Ok(TerminationOutcome::Killed)
    } else {
        Ok(TerminationOutcome::Exited)
    }
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32, _grace: Duration) -> io::Result<TerminationOutcome> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// Watch for the group leader to disappear, backing off from 5 ms to 40 ms
/// between probes so quick exits return quickly without spinning through a
/// long grace window.
#[cfg(unix)]
fn wait_for_exit(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    let mut pause = Duration::from_millis(5);
    loop {
        if matches!(sys::probe_pid(pid), sys::Probe::Gone) {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(pause.min(remaining));
        pause = (pause * 2).min(Duration::from_millis(40));
    }
}

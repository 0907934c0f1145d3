//! Subprocess plumbing for huskycat.
//!
//! Validation tools are always separate processes. This crate owns the three
//! things that make that reliable: spawning into a fresh process group,
//! capturing output under a deadline, and tearing the whole group down when
//! the deadline expires or the run is cancelled.

pub mod process_group;
pub mod spawn;

pub use process_group::{
    TerminationOutcome, detach_from_tty, is_pid_alive, set_process_group, terminate_group,
};
pub use spawn::{CapturedOutput, SpawnSpec, run_captured};

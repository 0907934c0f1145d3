//! Parallel execution of the selected tool set over the dependency DAG.

pub mod launcher;
pub mod scheduler;

pub use launcher::{LaunchOutcome, LaunchRequest, ProcessLauncher, ToolLauncher};
pub use scheduler::{ExecutorConfig, ParallelExecutor, WorkItem};

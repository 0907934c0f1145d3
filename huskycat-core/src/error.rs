use huskycat_commons::ExitCode;
use thiserror::Error;

/// Error taxonomy for the orchestrator.
///
/// Per-tool outcomes (findings, timeouts, unavailability) are *not* errors;
/// they are recovered into [`crate::ToolResult`]s by the executor. Only the
/// kinds below propagate out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid registry, malformed config file, unrecognized mode.
    Configuration,
    /// Every selected tool was unavailable.
    Unavailable,
    /// Run store write failed, lock acquisition failed, pid file unparsable.
    Io,
    /// User-initiated abort.
    Interrupted,
    /// Malformed JSON-RPC traffic in agent mode.
    Protocol,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OrchestratorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: message.into(),
        }
    }

    pub fn interrupted() -> Self {
        Self {
            kind: ErrorKind::Interrupted,
            message: "interrupted".to_string(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.kind {
            ErrorKind::Configuration | ErrorKind::Io | ErrorKind::Unavailable => {
                ExitCode::ConfigOrIo
            }
            ErrorKind::Interrupted => ExitCode::Interrupted,
            ErrorKind::Protocol => ExitCode::ConfigOrIo,
        }
    }
}

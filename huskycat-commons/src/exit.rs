/// Process exit codes shared by every command surface.
///
/// 0 success, 1 validation failure, 2 configuration or I/O error,
/// 130 user interrupt (128 + SIGINT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    ValidationFailed,
    ConfigOrIo,
    Interrupted,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ValidationFailed => 1,
            ExitCode::ConfigOrIo => 2,
            ExitCode::Interrupted => 130,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(value: ExitCode) -> Self {
        std::process::ExitCode::from(value.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_contract() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::ValidationFailed.code(), 1);
        assert_eq!(ExitCode::ConfigOrIo.code(), 2);
        assert_eq!(ExitCode::Interrupted.code(), 130);
    }
}

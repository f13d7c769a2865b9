//! Process exit codes.

use std::process::ExitCode;

/// Outcome classes reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    /// Invalid flags, malformed or duplicate socket specs, bad registry URI.
    CliError = 1,
    /// The configuration file could not be read or was rejected.
    ConfigurationError = 2,
    /// A socket could not be opened at startup.
    SocketError = 3,
    /// Anything else: bus connection failures, runtime faults.
    RuntimeError = 4,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

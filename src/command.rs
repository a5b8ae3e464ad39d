use crate::env::Environment;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Raw wait status of the most recently completed foreground pipeline.
///
/// The value is encoded the way `waitpid(2)` reports it: the exit code lives in
/// bits 8..16 and a terminating signal in the low seven bits. Only the exit code
/// portion is visible to users, through `$?` and the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// Status of a command that exited normally with `code`.
    pub fn exited(code: ExitCode) -> Self {
        Self((code & 0xff) << 8)
    }

    /// Status of a command that was terminated by `signal`.
    pub fn signaled(signal: i32) -> Self {
        Self(signal & 0x7f)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// The exit code portion of the status. Zero for signal terminations.
    pub fn code(self) -> ExitCode {
        (self.0 >> 8) & 0xff
    }
}

/// Object-safe trait for any command that runs inside the shell process.
///
/// This is implemented by built-ins via a blanket impl.
pub trait ExecutableCommand {
    /// Executes the command.
    ///
    /// Regular output goes to `stdout`; diagnostics go to `stderr`.
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_round_trips_through_raw_status() {
        let status = ExitStatus::exited(3);
        assert_eq!(status.raw(), 768);
        assert_eq!(status.code(), 3);
    }

    #[test]
    fn test_signal_status_has_zero_exit_code() {
        let status = ExitStatus::signaled(9);
        assert_eq!(status.raw(), 9);
        assert_eq!(status.code(), 0);
    }

    #[test]
    fn test_default_status_is_success() {
        assert_eq!(ExitStatus::default().raw(), 0);
        assert_eq!(ExitStatus::default().code(), 0);
    }
}

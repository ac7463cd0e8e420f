//! Running command-line clients (`smbclient`, iRODS icommands).

use extmount_core::storage::StorageError;
use extmount_core::storage::error::code;
use extmount_core::StorageResult;
use std::process::{Command, Stdio};
use tracing::trace;

/// Captured result of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; -1 when killed by a signal
    pub status: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the program exited with 0
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Standard output followed by standard error
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs external programs.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and extra environment variables
    fn run(&self, program: &str, args: &[String], env: &[(&str, &str)]) -> StorageResult<CommandOutput>;
}

/// [`CommandRunner`] spawning real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String], env: &[(&str, &str)]) -> StorageResult<CommandOutput> {
        trace!(program, ?args, "Running command");
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        for (key, value) in env {
            command.env(key, value);
        }
        let output = command.output().map_err(|e| {
            StorageError::not_available(format!("cannot run {program}: {e}"), code::ERROR)
        })?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_output() {
        let output = ProcessRunner
            .run("sh", &["-c".into(), "echo $GREETING; echo oops >&2; exit 3".into()], &[("GREETING", "hi")])
            .unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout, "hi\n");
        assert_eq!(output.stderr, "oops\n");
        assert!(!output.success());
    }

    #[test]
    fn test_missing_program() {
        let err = ProcessRunner
            .run("extmount-no-such-program", &[], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::NotAvailable { .. }));
    }
}

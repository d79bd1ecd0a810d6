//! External program execution: the seam between vag and `growpart`,
//! `xfs_growfs`, `resize2fs`, and the cloud CLI.

#![allow(missing_docs)]

use std::process::Command;

use crate::core::errors::{Result, VagError};

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a program to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    /// Spawn failures are errors; non-zero exits are returned as output.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Like `run`, but a non-zero exit becomes [`VagError::LocalTool`].
    fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = self.run(program, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(VagError::LocalTool {
                program: program.to_string(),
                args: args.to_vec(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs programs through `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| VagError::io(program, source))?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandRunner, SystemCommandRunner};
    use crate::core::errors::VagError;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn captures_stdout_of_successful_program() {
        let out = SystemCommandRunner
            .run("sh", &args(&["-c", "printf hello"]))
            .expect("sh should run");
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }

    #[test]
    fn non_zero_exit_is_output_not_error() {
        let out = SystemCommandRunner
            .run("sh", &args(&["-c", "echo nope >&2; exit 3"]))
            .expect("sh should run");
        assert_eq!(out.status, 3);
        assert_eq!(out.stderr.trim(), "nope");
    }

    #[test]
    fn run_checked_maps_failure_to_local_tool_error() {
        let err = SystemCommandRunner
            .run_checked("sh", &args(&["-c", "echo broken >&2; exit 2"]))
            .unwrap_err();
        match err {
            VagError::LocalTool {
                program,
                status,
                stderr,
                ..
            } => {
                assert_eq!(program, "sh");
                assert_eq!(status, 2);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_io_error() {
        let err = SystemCommandRunner
            .run("vag-definitely-not-installed", &[])
            .unwrap_err();
        assert_eq!(err.code(), "VAG-3902");
    }
}

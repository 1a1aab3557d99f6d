//! External command execution.
//!
//! `Cmd` is a small builder over `std::process::Command` that captures
//! output, logs the invocation and turns a non-zero exit into
//! [`Error::ToolFailed`] unless the caller opted into `allow_fail()`.
//! Volume managers hand their commands to a [`CommandRunner`], so the
//! sequence of tool calls can be inspected without touching the host.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, ExitStatus};
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builder for an external tool invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Message prefixed to stderr when the command fails.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Return the result even if the command exits non-zero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// The command line as a single string, for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn run(self) -> Result<CommandResult> {
        let command_line = self.command_line();
        debug!("exec: {}", command_line);

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| Error::ToolMissing {
                command: command_line.clone(),
                source,
            })?;

        let result = CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status,
        };

        if !result.success() && !self.allow_fail {
            let stderr = match self.error_msg {
                Some(msg) => format!("{}: {}", msg, result.stderr.trim()),
                None => result.stderr.trim().to_string(),
            };
            return Err(Error::ToolFailed {
                command: command_line,
                status: result.status.to_string(),
                stderr,
            });
        }

        Ok(result)
    }
}

/// Executes prepared commands.
pub trait CommandRunner {
    fn run(&self, cmd: Cmd) -> Result<CommandResult>;
}

/// Runs commands on the build host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        cmd.run()
    }
}

//! Helper subprocesses (motion detector, video pipeline, vitals reader).
//!
//! Spawns with piped stdio and hands the raw streams to protocol code.
//! There is no restart policy; exits are only logged.

use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};

/// Which stdio streams the helper gets as pipes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperIo {
    pub stdin: bool,
    pub stdout: bool,
}

impl HelperIo {
    pub const NONE: HelperIo = HelperIo {
        stdin: false,
        stdout: false,
    };
    pub const STDOUT: HelperIo = HelperIo {
        stdin: false,
        stdout: true,
    };
    pub const BOTH: HelperIo = HelperIo {
        stdin: true,
        stdout: true,
    };
}

/// A running helper program
pub struct HelperProcess {
    label: String,
    child: Child,
}

impl HelperProcess {
    /// Spawn `command[0]` with the remaining elements as arguments.
    pub fn spawn(label: &str, command: &[String], io: HelperIo) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| MonitorError::Config(format!("{} command is empty", label)))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(if io.stdin { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(if io.stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| MonitorError::Process {
            program: program.clone(),
            source,
        })?;

        tracing::info!(
            helper = label,
            program = %program,
            pid = ?child.id(),
            "Started helper process"
        );

        Ok(Self {
            label: label.to_string(),
            child,
        })
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child
            .stdin
            .take()
            .ok_or_else(|| MonitorError::Protocol(format!("{} stdin not piped", self.label)))
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| MonitorError::Protocol(format!("{} stdout not piped", self.label)))
    }

    /// Wait for the helper in the background and log how it ended.
    pub fn watch_exit(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!(helper = %self.label, "Helper process exited")
                }
                Ok(status) => {
                    tracing::warn!(helper = %self.label, %status, "Helper process exited with failure")
                }
                Err(e) => {
                    tracing::error!(helper = %self.label, error = %e, "Failed to wait for helper")
                }
            }
        })
    }
}

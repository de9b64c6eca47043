// SPDX-License-Identifier: GPL-3.0-only

//! Blocking invocation of external tools with a deadline.

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use which::which;

use crate::error::{Result, ToolError};
use crate::interrupt;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct Runner {
    timeout: Duration,
}

impl Runner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `tool` and fail on non-zero exit, timeout, or a pending interrupt.
    pub fn run(&self, tool: &str, args: &[String]) -> Result<CommandOutcome> {
        self.execute(tool, args, true)
    }

    /// Like [`Runner::run`] but ignores pending interrupts. Used for teardown,
    /// which has to finish even after the operator pressed Ctrl-C.
    pub fn run_to_completion(&self, tool: &str, args: &[String]) -> Result<CommandOutcome> {
        self.execute(tool, args, false)
    }

    fn execute(&self, tool: &str, args: &[String], interruptible: bool) -> Result<CommandOutcome> {
        let rendered = render(tool, args);
        let program = which(tool).map_err(|_| ToolError::Missing {
            tool: tool.to_string(),
        })?;

        debug!(command = %rendered, "running");
        let handle = duct::cmd(program, args.to_vec())
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|error| ToolError::io(format!("spawning `{rendered}`"), error))?;

        let started = Instant::now();
        let output = loop {
            match handle.try_wait() {
                Ok(Some(output)) => break output.clone(),
                Ok(None) => {}
                Err(error) => {
                    return Err(ToolError::io(format!("waiting for `{rendered}`"), error));
                }
            }

            if interruptible && let Some(signal) = interrupt::pending() {
                let _ = handle.kill();
                warn!(command = %rendered, %signal, "aborting on interrupt");
                return Err(ToolError::Interrupted {
                    tool: tool.to_string(),
                    command: rendered,
                    signal: signal.to_string(),
                });
            }

            if started.elapsed() >= self.timeout {
                let _ = handle.kill();
                warn!(command = %rendered, "timed out");
                return Err(ToolError::Timeout {
                    tool: tool.to_string(),
                    command: rendered,
                    seconds: self.timeout.as_secs(),
                });
            }

            sleep(POLL_INTERVAL);
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: tool.to_string(),
                command: rendered,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(CommandOutcome {
            command: rendered,
            stdout,
            stderr,
        })
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell command execution for `shell` and `branch` steps.
//!
//! Both step kinds run the same underlying command and only differ in
//! how the orchestrator interprets the result (§4.1.3 of `spec.md`): a
//! `shell` step records the outcome verbatim, a `branch` step further
//! classifies it into `true`/`false`/`timeout` to pick an expansion
//! target.

use crate::subprocess::run_with_timeout;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// The result of running a command to completion or to its timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutcome {
    /// `None` only when the command timed out before exiting.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs a shell command and captures its exit code, stdout, and stderr.
#[async_trait]
pub trait ShellRunner: Send + Sync + 'static {
    async fn run(
        &self,
        command: &str,
        cwd: Option<&PathBuf>,
        env: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> ShellOutcome;
}

/// Default `tokio::process`-backed implementation: `bash -c <command>`.
#[derive(Debug, Clone, Default)]
pub struct TokioShellRunner;

#[async_trait]
impl ShellRunner for TokioShellRunner {
    async fn run(
        &self,
        command: &str,
        cwd: Option<&PathBuf>,
        env: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> ShellOutcome {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in env {
            cmd.env(k, v);
        }

        let timeout = timeout.unwrap_or(crate::subprocess::SHELL_COMMAND_TIMEOUT);
        match run_with_timeout(cmd, timeout, "shell step").await {
            Ok(output) => ShellOutcome {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            },
            Err(message) => ShellOutcome {
                exit_code: None,
                stdout: String::new(),
                stderr: message,
                timed_out: true,
            },
        }
    }
}

/// A scripted [`ShellRunner`] for tests: returns a queued outcome per
/// call (or a default success if the queue is drained), and records
/// every command it was asked to run.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeShellRunner {
    pub calls: parking_lot::Mutex<Vec<String>>,
    pub outcomes: parking_lot::Mutex<std::collections::VecDeque<ShellOutcome>>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl FakeShellRunner {
    pub fn new() -> Self {
        Self {
            calls: parking_lot::Mutex::new(Vec::new()),
            outcomes: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push_outcome(&self, outcome: ShellOutcome) {
        self.outcomes.lock().push_back(outcome);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ShellRunner for FakeShellRunner {
    async fn run(
        &self,
        command: &str,
        _cwd: Option<&PathBuf>,
        _env: &HashMap<String, String>,
        _timeout: Option<Duration>,
    ) -> ShellOutcome {
        self.calls.lock().push(command.to_string());
        self.outcomes.lock().pop_front().unwrap_or(ShellOutcome {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;

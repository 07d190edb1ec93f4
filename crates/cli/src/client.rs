// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client: the Unix-socket transport the `meow` CLI speaks to
//! `meowd` over, plus the auto-start/auto-retry dance around it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::daemon_process::{
    cleanup_stale_socket, daemon_socket, probe_socket, start_daemon_background, stop_daemon_sync,
};

use meow_daemon::protocol::{self, ProtocolError};
use meow_daemon::{Request, Response};
use thiserror::Error;
use tokio::net::UnixStream;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for a single request/response round trip.
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("MEOW_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout waiting for a freshly spawned daemon to start accepting
/// connections.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("MEOW_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout waiting for the daemon process to exit after SIGTERM.
pub fn timeout_exit() -> Duration {
    parse_duration_ms("MEOW_TIMEOUT_EXIT_MS").unwrap_or(Duration::from_secs(2))
}

/// Poll interval while waiting for a connection to become available.
pub fn poll_interval() -> Duration {
    parse_duration_ms("MEOW_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running")]
    DaemonNotRunning,

    #[error("failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("timed out waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("daemon rejected request: {0}")]
    Rejected(String),

    #[error("unexpected response from daemon")]
    UnexpectedResponse,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not determine a state directory (set MEOW_STATE_DIR)")]
    NoStateDir,
}

/// Client for the daemon's control-plane requests (`RunCreate`,
/// `RunStatus`, `RunCancel`, `RunList`). Agent IPC traffic speaks the
/// same wire protocol but is never issued by this CLI — agents connect
/// directly.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// For commands that mutate run state (`run`, `cancel`): connect,
    /// spawning the daemon in the background if it isn't already up.
    pub fn for_action() -> Result<Self, ClientError> {
        match Self::connect() {
            Ok(client) => {
                if probe_socket(&client.socket_path) {
                    Ok(client)
                } else {
                    cleanup_stale_socket()?;
                    let child = start_daemon_background()?;
                    Self::connect_with_retry(timeout_connect(), child)
                }
            }
            Err(ClientError::DaemonNotRunning) => {
                let child = start_daemon_background()?;
                Self::connect_with_retry(timeout_connect(), child)
            }
            Err(e) => Err(e),
        }
    }

    /// For commands that only read state (`status`, `list`): connect to
    /// an existing daemon, never starting one. A daemon that isn't
    /// running has nothing to report anyway.
    pub fn for_query() -> Result<Self, ClientError> {
        Self::connect()
    }

    fn connect() -> Result<Self, ClientError> {
        let socket_path = daemon_socket()?;
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }
        Ok(Self { socket_path })
    }

    fn connect_with_retry(
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(ClientError::DaemonStartFailed(format!(
                        "daemon exited with {status}"
                    )));
                }
                Ok(None) | Err(_) => {}
            }
            match Self::connect() {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => std::thread::sleep(poll_interval()),
                Err(e) => return Err(e),
            }
        }
        Err(ClientError::DaemonStartTimeout)
    }

    async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();

        let data = protocol::encode(request)?;
        tokio::time::timeout(timeout_ipc(), protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let response_bytes = tokio::time::timeout(timeout_ipc(), protocol::read_message(&mut reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        Ok(protocol::decode(&response_bytes)?)
    }

    pub async fn run_create(
        &self,
        template: String,
        variables: std::collections::HashMap<String, String>,
    ) -> Result<meow_core::RunId, ClientError> {
        match self.send(&Request::RunCreate { template, variables }).await? {
            Response::RunCreated { run_id } => Ok(run_id),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn run_status(
        &self,
        run_id: meow_core::RunId,
    ) -> Result<meow_daemon::RunDetail, ClientError> {
        match self.send(&Request::RunStatus { run_id }).await? {
            Response::RunStatus { detail } => Ok(detail),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn run_cancel(&self, run_id: meow_core::RunId) -> Result<(), ClientError> {
        match self.send(&Request::RunCancel { run_id }).await? {
            Response::Ack => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn run_list(
        &self,
        status: Option<meow_core::RunStatus>,
    ) -> Result<Vec<meow_daemon::RunSummary>, ClientError> {
        match self.send(&Request::RunList { status }).await? {
            Response::RunList { runs } => Ok(runs),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Stop a running daemon, waiting (bounded) for its process to exit.
pub fn stop_daemon() {
    stop_daemon_sync(timeout_exit());
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

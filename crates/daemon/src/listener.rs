// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accept loop for the daemon's Unix socket: one task per connection,
//! each request decoded, dispatched, and answered independently. CLI
//! control requests and agent IPC messages share the same socket and
//! wire framing (`spec.md` §6); only the dispatch target differs.

use std::sync::Arc;
use std::time::Instant;

use meow_core::IpcResponse;
use meow_engine::IpcHandler;
use meow_storage::{RunFilter, RunStore};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, warn};

use crate::lifecycle::DaemonState;
use meow_daemon::protocol::{Request, Response, RunDetail, RunSummary, StepSummary};
use meow_daemon::protocol_wire::{self, DEFAULT_TIMEOUT};

/// Drives the accept loop until the listener is dropped (on shutdown).
pub async fn serve(
    listener: UnixListener,
    daemon: Arc<DaemonState>,
    ipc: Arc<IpcHandler<
        meow_storage::FsRunStore,
        crate::lifecycle::DaemonAgentManager,
        meow_adapters::TokioShellRunner,
        meow_core::SystemClock,
    >>,
) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let daemon = daemon.clone();
        let ipc = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, daemon, ipc).await {
                warn!(error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    daemon: Arc<DaemonState>,
    ipc: Arc<IpcHandler<
        meow_storage::FsRunStore,
        crate::lifecycle::DaemonAgentManager,
        meow_adapters::TokioShellRunner,
        meow_core::SystemClock,
    >>,
) -> Result<(), protocol_wire::ProtocolError> {
    loop {
        let request: Request = match protocol_wire::read_request(&mut stream, DEFAULT_TIMEOUT).await
        {
            Ok(req) => req,
            Err(protocol_wire::ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = dispatch(request, &daemon, &ipc).await;
        protocol_wire::write_response(&mut stream, &response, DEFAULT_TIMEOUT).await?;
    }
}

async fn dispatch(
    request: Request,
    daemon: &DaemonState,
    ipc: &IpcHandler<
        meow_storage::FsRunStore,
        crate::lifecycle::DaemonAgentManager,
        meow_adapters::TokioShellRunner,
        meow_core::SystemClock,
    >,
) -> Response {
    match request {
        Request::RunCreate { template, variables } => {
            match daemon.create_run(template, variables) {
                Ok(run_id) => {
                    info!(run = %run_id, "run created");
                    Response::RunCreated { run_id }
                }
                Err(message) => Response::Error { message },
            }
        }

        Request::RunStatus { run_id } => match daemon.store.get(&run_id) {
            Ok(run) => Response::RunStatus {
                detail: RunDetail {
                    summary: RunSummary {
                        id: run.id.clone(),
                        template: run.template.clone(),
                        status: run.status,
                        steps_total: run.steps.len(),
                        steps_done: run
                            .steps
                            .values()
                            .filter(|s| s.status == meow_core::StepStatus::Done)
                            .count(),
                        steps_failed: run
                            .steps
                            .values()
                            .filter(|s| s.status == meow_core::StepStatus::Failed)
                            .count(),
                    },
                    steps: run
                        .steps
                        .values()
                        .map(|s| StepSummary {
                            id: s.id.as_str().to_string(),
                            status: s.status,
                        })
                        .collect(),
                },
            },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        },

        Request::RunCancel { run_id } => {
            let Some(orch) = daemon.registry_lookup(&run_id) else {
                return Response::Error {
                    message: format!("run {run_id} is not active"),
                };
            };
            match orch.stop().await {
                Ok(()) => Response::Ack,
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }

        Request::RunList { status } => {
            let filter = RunFilter { status };
            match daemon.store.list(&filter) {
                Ok(runs) => Response::RunList {
                    runs: runs
                        .into_iter()
                        .map(|run| RunSummary {
                            id: run.id.clone(),
                            template: run.template.clone(),
                            status: run.status,
                            steps_total: run.steps.len(),
                            steps_done: run
                                .steps
                                .values()
                                .filter(|s| s.status == meow_core::StepStatus::Done)
                                .count(),
                            steps_failed: run
                                .steps
                                .values()
                                .filter(|s| s.status == meow_core::StepStatus::Failed)
                                .count(),
                        })
                        .collect(),
                },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }

        Request::Ipc(msg) => {
            let now = Instant::now();
            let now_ms = daemon_now_ms();
            let resp: IpcResponse = ipc.handle(msg, now, now_ms).await;
            Response::Ipc(resp)
        }
    }
}

fn daemon_now_ms() -> u64 {
    use meow_core::Clock;
    meow_core::SystemClock.epoch_ms()
}

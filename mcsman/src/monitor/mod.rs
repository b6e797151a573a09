//! Command monitor: the local trusted socket and the optional remote TLS
//! listener. One connection carries one text request and receives one JSON
//! response; dispatch is an exhaustive match over the decoded request.

pub mod tls;

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::protocol::{BackupRequest, ParseRequestError, Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backup::BackupCoordinator;
use crate::config::Config;
use crate::info;
use crate::session::SessionDriver;
use crate::store::StatusStore;
use crate::supervisor::Supervisor;

/// Permissions of the local command socket: owner and group only.
const SOCKET_MODE: u32 = 0o770;
/// Upper bound on a single request buffer.
const MAX_REQUEST: usize = 64 * 1024;

pub struct CommandMonitor {
    supervisor: Arc<Supervisor>,
    backups: Arc<BackupCoordinator>,
    store: Arc<StatusStore>,
    driver: Arc<dyn SessionDriver>,
    cfg: Arc<Config>,
}

impl CommandMonitor {
    pub fn new(
        supervisor: Arc<Supervisor>,
        backups: Arc<BackupCoordinator>,
        store: Arc<StatusStore>,
        driver: Arc<dyn SessionDriver>,
        cfg: Arc<Config>,
    ) -> Self {
        CommandMonitor {
            supervisor,
            backups,
            store,
            driver,
            cfg,
        }
    }

    /// Binds the local command socket and serves connections until the
    /// token is cancelled. A stale socket from a previous run is removed.
    pub async fn run_local(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        let path = &self.cfg.socket_path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("cleaning up previous socket {}", path.display()))?;
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("starting listener on {}", path.display()))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("restricting {}", path.display()))?;
        info!(socket = %path.display(), "command monitor listening");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let monitor = Arc::clone(&self);
                            tokio::spawn(async move {
                                monitor.handle_connection(stream, false).await;
                            });
                        }
                        Err(err) => warn!(error = %err, "error accepting command connection"),
                    }
                }
            }
        }

        // The bind created the file; unlink it on the way out so nothing
        // connects to a dead socket.
        if let Err(err) = std::fs::remove_file(path) {
            warn!(error = %err, socket = %path.display(), "failed to remove command socket");
        }
        Ok(())
    }

    /// Serves one connection: read one request under the deadline, answer
    /// with exactly one structured response, close. Every failure mode that
    /// still has a usable transport gets a response rather than a hangup.
    pub(crate) async fn handle_connection<S>(&self, mut stream: S, remote: bool)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // One absolute deadline covers the whole exchange, read and write
        // alike, so a peer that never reads cannot pin the task.
        let deadline = tokio::time::Instant::now() + self.cfg.command_timeout;
        let mut buf = vec![0u8; MAX_REQUEST];
        let response = match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) => Response::timeout(),
            Ok(Err(_)) => Response::conn_error(),
            Ok(Ok(n)) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                info!(request = %text.trim(), remote, "received command request");
                match Request::parse(&text) {
                    Ok(request) => self.dispatch(request, remote).await,
                    Err(err) => parse_error_response(&err),
                }
            }
        };

        let encoded = serde_json::to_vec(&response).unwrap_or_default();
        let write = async {
            stream.write_all(&encoded).await?;
            stream.shutdown().await
        };
        match tokio::time::timeout_at(deadline, write).await {
            Err(_) => warn!("deadline expired before the response was written"),
            Ok(Err(err)) => warn!(error = %err, "failed to write command response"),
            Ok(Ok(())) => {}
        }
    }

    /// Executes a decoded request. Remote connections are limited to the
    /// read-only info command and backup creation against the configured
    /// bucket; everything else answers command-not-found.
    pub async fn dispatch(&self, request: Request, remote: bool) -> Response {
        if remote && !matches!(request, Request::ServerInfo | Request::BackupCreate(_)) {
            return Response::not_found();
        }
        match request {
            Request::ServerStart(servers) => Response::execution(
                format!("Started servers {servers:?}"),
                self.supervisor.start(&servers).await.map(|_| ()),
            ),
            Request::ServerStop(servers) => Response::execution(
                format!("Stopped servers {servers:?}"),
                self.supervisor.stop(&servers).await.map(|_| ()),
            ),
            Request::ServerRestart(servers) => Response::execution(
                format!("Restarted servers {servers:?}"),
                self.supervisor.restart(&servers).await,
            ),
            Request::ServerInfo => {
                let running = self.driver.list_running().await.unwrap_or_default();
                Response::execution(
                    info::render_server_info(&self.store.servers_snapshot(), &running),
                    Ok::<(), anyhow::Error>(()),
                )
            }
            Request::BackupCreate(create) => {
                let create = if remote {
                    // Remote callers cannot choose a destination; backups go
                    // to the bucket this host was configured with.
                    let bucket = self
                        .cfg
                        .tls
                        .as_ref()
                        .map(|tls| tls.bucket.clone())
                        .unwrap_or_default();
                    BackupRequest {
                        force: true,
                        bucket,
                        skip_upload: false,
                        servers: create.servers,
                    }
                } else {
                    create
                };
                let servers = create.servers.clone();
                Response::execution(
                    format!("Created backups for {servers:?}"),
                    self.backups.create(&create).await.map(|_| ()),
                )
            }
            Request::BackupInfo => Response::execution(
                info::render_backup_info(&self.store.backups_snapshot()),
                Ok::<(), anyhow::Error>(()),
            ),
        }
    }
}

fn parse_error_response(err: &ParseRequestError) -> Response {
    match err {
        ParseRequestError::UnknownDomain(_)
        | ParseRequestError::UnknownAction { .. }
        | ParseRequestError::MissingAction(_) => Response::not_found(),
        ParseRequestError::Empty | ParseRequestError::BadPayload(_) => Response::internal_error(),
    }
}

//! Start/stop/restart/kill/recover logic plus the reconciliation tick that
//! converges observed sessions toward recorded intent.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crash::CrashReports;
use crate::session::SessionDriver;
use crate::store::StatusStore;
use crate::util::join_errors;

/// Entrypoint script expected inside every server directory.
const ENTRYPOINT: &str = "./run.sh";
/// Per-server properties file carrying the port keys.
const PROPERTIES_FILE: &str = "server.properties";
/// Line sent to a session to request a natural shutdown.
const STOP_COMMAND: &str = "stop";

pub struct Supervisor {
    store: Arc<StatusStore>,
    driver: Arc<dyn SessionDriver>,
    crash: Arc<dyn CrashReports>,
    cfg: Arc<Config>,
}

impl Supervisor {
    pub fn new(
        store: Arc<StatusStore>,
        driver: Arc<dyn SessionDriver>,
        crash: Arc<dyn CrashReports>,
        cfg: Arc<Config>,
    ) -> Self {
        Supervisor {
            store,
            driver,
            crash,
            cfg,
        }
    }

    /// Starts every named server that is not already running. Newly seen
    /// servers get the lowest unused port at or above the base port written
    /// into their properties file. Already-running names are no-ops. Status
    /// is persisted once at the end, and only if something was started.
    pub async fn start(&self, servers: &[String]) -> Result<Vec<String>> {
        let running = self.driver.list_running().await?;
        let mut started = Vec::new();
        let mut errs = Vec::new();

        for server in servers {
            if running.contains(server) {
                info!(server, "already running, skipping launch");
                continue;
            }
            if let Err(err) = self.start_one(server).await {
                errs.push(err.context(format!("starting server {server:?}")));
                continue;
            }
            started.push(server.clone());
        }

        if !started.is_empty() {
            if let Err(err) = self.store.persist_servers() {
                errs.push(err.context("updating server status"));
            }
        }
        join_errors(errs)?;
        Ok(started)
    }

    async fn start_one(&self, server: &str) -> Result<()> {
        let (port, is_new) = self.store.register_server(server, self.cfg.base_port)?;
        let dir = common::server_dir(self.store.base_dir(), server);
        if is_new {
            // A registration only sticks once the port is on disk; rolled
            // back, the next attempt assigns and writes it again.
            if let Err(err) = set_port(&dir.join(PROPERTIES_FILE), port) {
                self.store.remove_server(server);
                return Err(err);
            }
            info!(server, port, "assigned port to new server");
        } else {
            debug!(server, port, "reusing stored port");
        }
        self.store.mark_started(server);
        self.driver.launch(server, &dir, ENTRYPOINT).await?;
        info!(server, port, "started server");
        Ok(())
    }

    /// Stops every named server concurrently. A server that fails to exit
    /// within the kill timeout is force-terminated once. Every stopped
    /// server becomes backup-eligible. Status is persisted once after all
    /// stops, and only if something transitioned.
    pub async fn stop(&self, servers: &[String]) -> Result<Vec<String>> {
        let running = self.driver.list_running().await?;
        let outcomes = join_all(servers.iter().map(|server| {
            let was_running = running.contains(server);
            async move {
                if !was_running {
                    return (server, Ok(false));
                }
                (server, self.stop_one(server).await.map(|()| true))
            }
        }))
        .await;

        let mut stopped = Vec::new();
        let mut errs = Vec::new();
        for (server, outcome) in outcomes {
            match outcome {
                Ok(true) => stopped.push(server.clone()),
                Ok(false) => {}
                Err(err) => errs.push(err.context(format!("stopping server {server:?}"))),
            }
        }

        if !stopped.is_empty() {
            if let Err(err) = self.store.persist_servers() {
                errs.push(err.context("updating server status"));
            }
            if let Err(err) = self.store.persist_backups() {
                errs.push(err.context("updating backup status"));
            }
        }
        join_errors(errs)?;
        Ok(stopped)
    }

    async fn stop_one(&self, server: &str) -> Result<()> {
        self.store.mark_stopping(server);
        self.driver.send_line(server, STOP_COMMAND).await?;

        // Poll the running set until the session is gone or the kill
        // timeout elapses; only then force the issue.
        let deadline = tokio::time::Instant::now() + self.cfg.kill_timeout;
        let mut present = true;
        while present && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.cfg.stop_poll_interval).await;
            match self.driver.list_running().await {
                Ok(current) => present = current.contains(&server.to_string()),
                Err(err) => warn!(server, error = %err, "failed to poll running servers"),
            }
        }
        if present {
            warn!(server, "did not exit within timeout, force-killing");
            self.kill(false, server).await?;
        }

        // Stopping is always a backup trigger point.
        self.store.set_backup_enabled(server, true);
        info!(server, "stopped server");
        Ok(())
    }

    /// Stop followed by Start; one name's failure is reported without
    /// blocking the other names.
    pub async fn restart(&self, servers: &[String]) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(err) = self.stop(servers).await {
            errs.push(err.context("stopping servers"));
        }
        if let Err(err) = self.start(servers).await {
            errs.push(err.context("starting servers"));
        }
        join_errors(errs)
    }

    /// Force-terminates the session. An operator kill (`recover == false`)
    /// also drops the run intent; a recovery kill keeps it so the server
    /// restarts.
    pub async fn kill(&self, recover: bool, server: &str) -> Result<()> {
        if !recover {
            self.store.update_server(server, |status| status.should_run = false);
        }
        self.driver
            .terminate(server)
            .await
            .with_context(|| format!("force-killing server {server:?}"))
    }

    /// Checks the server's newest crash report and, when it is fresher than
    /// the recovery window and no recovery is in flight, kills and restarts
    /// the server. The `recovering` guard suppresses concurrent triggers and
    /// is cleared after the window elapses. Stale reports are ignored.
    pub async fn recover(&self, server: &str) -> Result<bool> {
        let Some(crash_time) = self.crash.latest_crash(server)? else {
            return Ok(false);
        };
        let window = ChronoDuration::from_std(self.cfg.recovery_window)
            .map_err(|err| anyhow!("recovery window out of range: {err}"))?;
        if Utc::now().signed_duration_since(crash_time) >= window {
            return Ok(false);
        }
        if !self.store.begin_recovery(server) {
            return Ok(false);
        }

        warn!(server, %crash_time, "crash detected, recovering");
        self.kill(true, server)
            .await
            .with_context(|| format!("killing crashed server {server:?}"))?;

        // The guard clears once the window elapses, at which point a fresh
        // crash report may trigger recovery again.
        let store = Arc::clone(&self.store);
        let name = server.to_string();
        let window = self.cfg.recovery_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            store.end_recovery(&name);
        });

        self.start(std::slice::from_ref(&server.to_string())).await?;
        Ok(true)
    }

    /// One reconciliation pass: queue every registered server whose intent
    /// says running but which is absent from the running set, run crash
    /// recovery for every registered server, then start the queue.
    pub async fn reconcile(&self) -> Result<()> {
        let running = self.driver.list_running().await?;
        let statuses = self.store.servers_snapshot();

        let mut to_start: Vec<String> = statuses
            .iter()
            .filter(|(name, status)| status.should_run && !running.contains(name))
            .map(|(name, _)| name.clone())
            .collect();
        to_start.sort_unstable();

        let mut errs = Vec::new();
        for name in statuses.keys() {
            if let Err(err) = self.recover(name).await {
                errs.push(err.context(format!("recovering server {name:?}")));
            }
        }
        if !to_start.is_empty() {
            debug!(servers = ?to_start, "restarting stopped servers");
            if let Err(err) = self.start(&to_start).await {
                errs.push(err);
            }
        }
        join_errors(errs)
    }
}

/// Rewrites the two port keys in a `server.properties` file.
fn set_port(path: &Path, port: u16) -> Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let rewritten: Vec<String> = contents
        .lines()
        .map(|line| {
            if line.starts_with("query.port") {
                format!("query.port={port}")
            } else if line.starts_with("server-port") {
                format!("server-port={port}")
            } else {
                line.to_string()
            }
        })
        .collect();
    fs::write(path, rewritten.join("\n"))
        .with_context(|| format!("writing {}", path.display()))
}

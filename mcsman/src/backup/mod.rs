//! Backup coordination: decide which servers are eligible, archive their
//! world data, upload the artifact, and step eligibility back down once the
//! server has gone quiet.

pub mod archive;
pub mod storage;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use common::protocol::BackupRequest;
use futures::future::join_all;
use tracing::{debug, info};

use crate::config::Config;
use crate::query::PlayerCount;
use crate::session::SessionDriver;
use crate::store::StatusStore;
use crate::util::join_errors;
use storage::{GcsUrl, ObjectStore};

/// Subdirectory of a server holding its world data.
const WORLD_DIR: &str = "world";
/// Sentinel server name resolving to every server under the base dir.
const ALL_SERVERS: &str = "all";

pub struct BackupCoordinator {
    store: Arc<StatusStore>,
    driver: Arc<dyn SessionDriver>,
    query: Arc<dyn PlayerCount>,
    storage: Arc<dyn ObjectStore>,
    cfg: Arc<Config>,
}

impl BackupCoordinator {
    pub fn new(
        store: Arc<StatusStore>,
        driver: Arc<dyn SessionDriver>,
        query: Arc<dyn PlayerCount>,
        storage: Arc<dyn ObjectStore>,
        cfg: Arc<Config>,
    ) -> Self {
        BackupCoordinator {
            store,
            driver,
            query,
            storage,
            cfg,
        }
    }

    /// Backs up every eligible server in the request concurrently. The
    /// destination is validated before any server is touched; per-server
    /// failures aggregate without blocking siblings; the eligibility map is
    /// persisted once at the end if anything was backed up. Returns the
    /// names actually backed up.
    pub async fn create(&self, request: &BackupRequest) -> Result<Vec<String>> {
        let dest = GcsUrl::parse(&request.bucket)?;
        let servers = self.resolve_servers(&request.servers)?;

        let running = self.driver.list_running().await.unwrap_or_default();
        let outcomes = join_all(servers.iter().map(|server| {
            let dest = dest.clone();
            let is_running = running.contains(server);
            async move {
                (
                    server,
                    self.backup_one(server, &dest, request, is_running).await,
                )
            }
        }))
        .await;

        let mut backed_up = Vec::new();
        let mut errs = Vec::new();
        for (server, outcome) in outcomes {
            match outcome {
                Ok(true) => backed_up.push(server.clone()),
                Ok(false) => {}
                Err(err) => errs.push(err.context(format!("backing up server {server:?}"))),
            }
        }

        if !backed_up.is_empty() {
            if let Err(err) = self.store.persist_backups() {
                errs.push(err.context("updating backup status"));
            }
        }
        join_errors(errs)?;
        Ok(backed_up)
    }

    /// Expands the `all` sentinel into every server directory found under
    /// the base dir.
    fn resolve_servers(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.iter().any(|name| name == ALL_SERVERS) {
            return Ok(requested.to_vec());
        }
        all_servers(&self.cfg.base_dir)
    }

    async fn backup_one(
        &self,
        server: &str,
        dest: &GcsUrl,
        request: &BackupRequest,
        is_running: bool,
    ) -> Result<bool> {
        // Servers never seen before default to eligible.
        let eligible =
            request.force || self.store.backup_enabled(server).unwrap_or(true);
        if !eligible {
            debug!(server, "backups disabled, skipping");
            return Ok(false);
        }

        if is_running {
            self.notify(server, "Creating backup...").await;
            self.driver
                .send_line(server, "save-all")
                .await
                .with_context(|| format!("force-saving server {server:?}"))?;
        }

        let world = common::server_dir(self.store.base_dir(), server).join(WORLD_DIR);
        let staging = tempfile::tempdir().context("creating staging directory")?;
        let artifact = staging.path().join(artifact_name(server));
        let world_src = world.clone();
        let artifact_dest = artifact.clone();
        tokio::task::spawn_blocking(move || archive::archive_dir(&world_src, &artifact_dest))
            .await
            .context("archive task panicked")??;

        if !request.skip_upload {
            let key = format!("{server}/{}", artifact_name(server));
            self.storage.upload(&artifact, dest, &key).await?;
        }
        drop(staging); // local artifact removed once the upload is done

        if is_running {
            let done = format!("Backup created at {}", Utc::now().to_rfc3339());
            self.notify(server, &done).await;
        }
        info!(server, "backup complete");

        // No one online (or not registered at all): stop backing up until
        // activity returns.
        match self.store.server(server) {
            Some(status) => {
                let online = self.query.online(status.port).await.unwrap_or(0);
                if online == 0 {
                    self.store.set_backup_enabled(server, false);
                }
            }
            None => {
                self.store.set_backup_enabled(server, false);
            }
        }
        Ok(true)
    }

    /// Best-effort in-game announcement; a failure to deliver it never
    /// fails the backup.
    async fn notify(&self, server: &str, message: &str) {
        if let Err(err) = self
            .driver
            .send_line(server, &format!("say {message}"))
            .await
        {
            debug!(server, error = %err, "could not notify server");
        }
    }
}

/// Name of the archive artifact for a server.
fn artifact_name(server: &str) -> String {
    format!("{server}-backup.tar.gz")
}

/// Every server found under the base directory (its subdirectories).
pub fn all_servers(base_dir: &PathBuf) -> Result<Vec<String>> {
    let entries = fs::read_dir(base_dir)
        .with_context(|| format!("reading server directory {}", base_dir.display()))?;
    let mut servers = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            servers.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    servers.sort_unstable();
    Ok(servers)
}

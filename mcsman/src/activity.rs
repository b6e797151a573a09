//! Periodic player-activity polling. A server seen with players online
//! becomes backup-eligible; the map is persisted only on actual change.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{Duration as ChronoDuration, Utc};
use tracing::debug;

use crate::config::Config;
use crate::query::PlayerCount;
use crate::session::SessionDriver;
use crate::store::StatusStore;
use crate::util::join_errors;

pub struct ActivityPoller {
    store: Arc<StatusStore>,
    driver: Arc<dyn SessionDriver>,
    query: Arc<dyn PlayerCount>,
    cfg: Arc<Config>,
}

impl ActivityPoller {
    pub fn new(
        store: Arc<StatusStore>,
        driver: Arc<dyn SessionDriver>,
        query: Arc<dyn PlayerCount>,
        cfg: Arc<Config>,
    ) -> Self {
        ActivityPoller {
            store,
            driver,
            query,
            cfg,
        }
    }

    /// One polling pass over every registered, intended-to-run, running
    /// server. Query failures inside the boot grace period are suppressed;
    /// other failures are aggregated without blocking sibling servers.
    pub async fn tick(&self) -> Result<()> {
        let running = self.driver.list_running().await?;
        let grace = ChronoDuration::from_std(self.cfg.boot_grace)
            .map_err(|err| anyhow!("boot grace out of range: {err}"))?;

        let mut errs = Vec::new();
        let mut changed = false;
        for server in &running {
            let Some(status) = self.store.server(server) else {
                continue; // not registered, nothing to track
            };
            if !status.should_run {
                continue;
            }
            match self.query.online(status.port).await {
                Ok(online) if online > 0 => {
                    debug!(server, online, "players online, enabling backups");
                    changed |= self.store.set_backup_enabled(server, true);
                }
                Ok(_) => {}
                Err(err) => {
                    let booting = status
                        .start_time
                        .map(|started| Utc::now().signed_duration_since(started) < grace)
                        .unwrap_or(false);
                    if !booting {
                        errs.push(anyhow!("fetching {server:?} server status: {err:#}"));
                    }
                }
            }
        }

        if changed {
            if let Err(err) = self.store.persist_backups() {
                errs.push(err.context("updating backup status"));
            }
        }
        join_errors(errs)
    }
}

//! The single source of truth for per-server state.
//!
//! Both maps live behind this type; callers go through lock-scoped
//! operations and never hold references into the maps. Persistence
//! serializes a snapshot taken under the lock and writes it outside the
//! lock, so no I/O ever happens while a lock is held.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use common::status::{BACKUP_LOCK_FILE, SERVER_INFO_FILE, ServerStatus};
use tracing::{debug, info};

pub struct StatusStore {
    base_dir: PathBuf,
    servers: Mutex<HashMap<String, ServerStatus>>,
    backups: Mutex<HashMap<String, bool>>,
}

impl StatusStore {
    /// Reads both persisted maps from the base directory. A missing file
    /// yields an empty map, not an error.
    pub fn load(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let servers = read_map(&base_dir.join(SERVER_INFO_FILE))?;
        let backups = read_map(&base_dir.join(BACKUP_LOCK_FILE))?;
        Ok(StatusStore {
            base_dir,
            servers: Mutex::new(servers),
            backups: Mutex::new(backups),
        })
    }

    /// An empty store rooted at the given directory.
    pub fn empty(base_dir: impl Into<PathBuf>) -> Self {
        StatusStore {
            base_dir: base_dir.into(),
            servers: Mutex::new(HashMap::new()),
            backups: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn server(&self, name: &str) -> Option<ServerStatus> {
        self.servers().get(name).cloned()
    }

    /// Atomic read-modify-write; the entry is created if absent.
    pub fn upsert_server(&self, name: &str, mutate: impl FnOnce(&mut ServerStatus)) {
        let mut servers = self.servers();
        let entry = servers
            .entry(name.to_string())
            .or_insert_with(|| ServerStatus::new(name, 0));
        mutate(entry);
    }

    /// Atomic read-modify-write of an existing entry. Returns false and does
    /// nothing if the server is not registered.
    pub fn update_server(&self, name: &str, mutate: impl FnOnce(&mut ServerStatus)) -> bool {
        let mut servers = self.servers();
        match servers.get_mut(name) {
            Some(entry) => {
                mutate(entry);
                true
            }
            None => false,
        }
    }

    /// Looks up the server's port, registering the server with the lowest
    /// unused port at or above `base_port` if it was unknown. Returns the
    /// port and whether the server was newly registered, or an error when
    /// every port at or above the base is taken. The whole decision runs
    /// under one lock acquisition, so two concurrent calls for the same
    /// name cannot both win the is-new branch.
    pub fn register_server(&self, name: &str, base_port: u16) -> Result<(u16, bool)> {
        let mut servers = self.servers();
        if let Some(status) = servers.get(name) {
            return Ok((status.port, false));
        }
        let mut port = base_port;
        while servers.values().any(|s| s.port == port) {
            port = port
                .checked_add(1)
                .with_context(|| format!("no free port at or above {base_port}"))?;
        }
        servers.insert(name.to_string(), ServerStatus::new(name, port));
        Ok((port, true))
    }

    /// Drops a registration that never completed, freeing its port for the
    /// next attempt.
    pub fn remove_server(&self, name: &str) {
        self.servers().remove(name);
    }

    /// Marks a recovery attempt in flight. Returns false if the server is
    /// unknown or already mid-recovery, which makes concurrent recovery
    /// triggers no-ops.
    pub fn begin_recovery(&self, name: &str) -> bool {
        let mut servers = self.servers();
        match servers.get_mut(name) {
            Some(status) if !status.recovering => {
                status.recovering = true;
                true
            }
            _ => false,
        }
    }

    pub fn end_recovery(&self, name: &str) {
        self.update_server(name, |status| status.recovering = false);
    }

    pub fn backup_enabled(&self, name: &str) -> Option<bool> {
        self.backups().get(name).copied()
    }

    /// Sets the backup-eligibility flag, returning whether the stored value
    /// actually changed (absent counts as a change).
    pub fn set_backup_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut backups = self.backups();
        backups.insert(name.to_string(), enabled) != Some(enabled)
    }

    pub fn servers_snapshot(&self) -> HashMap<String, ServerStatus> {
        self.servers().clone()
    }

    pub fn backups_snapshot(&self) -> HashMap<String, bool> {
        self.backups().clone()
    }

    /// Writes the server-status map to disk. Failure is reported to the
    /// caller but the in-memory state stays authoritative either way.
    pub fn persist_servers(&self) -> Result<()> {
        let snapshot = self.servers_snapshot();
        write_map(&self.base_dir.join(SERVER_INFO_FILE), &snapshot)
    }

    /// Writes the backup-eligibility map to disk.
    pub fn persist_backups(&self) -> Result<()> {
        let snapshot = self.backups_snapshot();
        write_map(&self.base_dir.join(BACKUP_LOCK_FILE), &snapshot)
    }

    /// Stamps a fresh start on the server: intent up, start time now.
    pub fn mark_started(&self, name: &str) {
        self.upsert_server(name, |status| {
            status.should_run = true;
            status.start_time = Some(Utc::now());
        });
    }

    /// Records operator intent to stop: intent down, start time cleared.
    pub fn mark_stopping(&self, name: &str) {
        self.update_server(name, |status| {
            status.should_run = false;
            status.start_time = None;
        });
    }

    fn servers(&self) -> std::sync::MutexGuard<'_, HashMap<String, ServerStatus>> {
        self.servers.lock().expect("server status lock poisoned")
    }

    fn backups(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.backups.lock().expect("backup status lock poisoned")
    }
}

fn read_map<T: serde::de::DeserializeOwned>(path: &Path) -> Result<HashMap<String, T>> {
    debug!(path = %path.display(), "reading status file");
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading status file {}", path.display()));
        }
    };
    serde_json::from_slice(&contents)
        .with_context(|| format!("unmarshaling status file {}", path.display()))
}

fn write_map<T: serde::Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<()> {
    let encoded = serde_json::to_vec(map).context("marshaling status map")?;
    fs::write(path, &encoded)
        .with_context(|| format!("writing status file {}", path.display()))?;
    info!(path = %path.display(), bytes = encoded.len(), "updated status file");
    Ok(())
}

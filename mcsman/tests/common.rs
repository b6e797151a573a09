use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcsman::backup::storage::{GcsUrl, ObjectStore};
use mcsman::config::Config;
use mcsman::crash::CrashReports;
use mcsman::query::PlayerCount;
use mcsman::session::SessionDriver;

/// Config with a temp base dir and short enough timeouts for paused-clock
/// tests.
pub fn test_config(base_dir: &Path) -> Config {
    Config {
        base_dir: base_dir.to_path_buf(),
        socket_path: base_dir.join("manager.sock"),
        command_timeout: Duration::from_secs(5),
        kill_timeout: Duration::from_secs(3),
        stop_poll_interval: Duration::from_secs(1),
        recovery_window: Duration::from_secs(30),
        ..Config::default()
    }
}

/// Creates a server directory with a default properties file.
#[allow(dead_code)]
pub fn make_server_dir(base_dir: &Path, name: &str) -> PathBuf {
    let dir = base_dir.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("server.properties"),
        "motd=test\nserver-port=25565\nquery.port=25565\n",
    )
    .unwrap();
    dir
}

/// In-memory session driver. Launched servers join the running set;
/// `stop_obeys` controls whether a "stop" line removes them again, so tests
/// can simulate a hung server.
#[derive(Default)]
pub struct FakeDriver {
    pub running: Mutex<HashSet<String>>,
    pub launches: Mutex<Vec<String>>,
    pub lines: Mutex<Vec<(String, String)>>,
    pub terminations: Mutex<Vec<String>>,
    pub stop_obeys: bool,
}

#[allow(dead_code)]
impl FakeDriver {
    pub fn obedient() -> Self {
        FakeDriver {
            stop_obeys: true,
            ..FakeDriver::default()
        }
    }

    pub fn with_running(names: &[&str]) -> Self {
        let driver = FakeDriver::obedient();
        {
            let mut running = driver.running.lock().unwrap();
            for name in names {
                running.insert(name.to_string());
            }
        }
        driver
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn termination_count(&self) -> usize {
        self.terminations.lock().unwrap().len()
    }

    pub fn lines_for(&self, server: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == server)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

#[async_trait]
impl SessionDriver for FakeDriver {
    async fn list_running(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.running.lock().unwrap().iter().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn launch(&self, server: &str, _dir: &Path, _entrypoint: &str) -> Result<()> {
        self.launches.lock().unwrap().push(server.to_string());
        self.running.lock().unwrap().insert(server.to_string());
        Ok(())
    }

    async fn send_line(&self, server: &str, line: &str) -> Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push((server.to_string(), line.to_string()));
        if self.stop_obeys && line == "stop" {
            self.running.lock().unwrap().remove(server);
        }
        Ok(())
    }

    async fn terminate(&self, server: &str) -> Result<()> {
        self.terminations.lock().unwrap().push(server.to_string());
        self.running.lock().unwrap().remove(server);
        Ok(())
    }
}

/// Crash reports pinned in memory.
#[derive(Default)]
pub struct FakeCrash {
    pub crashes: Mutex<HashMap<String, DateTime<Utc>>>,
}

#[allow(dead_code)]
impl FakeCrash {
    pub fn crashed_now(server: &str) -> Self {
        let crash = FakeCrash::default();
        crash
            .crashes
            .lock()
            .unwrap()
            .insert(server.to_string(), Utc::now());
        crash
    }
}

impl CrashReports for FakeCrash {
    fn latest_crash(&self, server: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.crashes.lock().unwrap().get(server).copied())
    }
}

/// Player counts keyed by port; unknown ports refuse the connection.
#[derive(Default)]
pub struct FakeQuery {
    pub online: Mutex<HashMap<u16, u32>>,
}

#[allow(dead_code)]
impl FakeQuery {
    pub fn set_online(&self, port: u16, count: u32) {
        self.online.lock().unwrap().insert(port, count);
    }
}

#[async_trait]
impl PlayerCount for FakeQuery {
    async fn online(&self, port: u16) -> Result<u32> {
        match self.online.lock().unwrap().get(&port) {
            Some(count) => Ok(*count),
            None => bail!("connection refused on port {port}"),
        }
    }
}

/// Records uploads instead of shelling out.
#[derive(Default)]
pub struct RecordingStore {
    pub uploads: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload(&self, local: &Path, dest: &GcsUrl, key: &str) -> Result<()> {
        assert!(local.exists(), "artifact {} missing at upload", local.display());
        self.uploads.lock().unwrap().push(dest.object_url(key));
        Ok(())
    }
}

//! Auxiliary per-server scripts, described by an optional `scripts.yaml` in
//! each server directory and run on their own cadence from that directory.
//! Last-run times are tracked in memory so the descriptor file never needs
//! rewriting.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::parse_duration;
use crate::util::join_errors;

/// Descriptor file inside a server directory.
const CONFIG_FILE: &str = "scripts.yaml";
/// Subdirectory holding the executables.
const SCRIPTS_DIR: &str = "scripts";

#[derive(Debug, Clone, Default, Deserialize)]
struct ScriptsConfig {
    #[serde(default)]
    scripts: Vec<ExtraScript>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtraScript {
    /// Executable filename under the server's scripts directory.
    name: String,
    /// Minimum time between runs, e.g. `30m`.
    #[serde(deserialize_with = "duration_from_str")]
    interval: Duration,
    /// Tracked in memory; never read back from disk.
    #[serde(rename = "last-run", default)]
    last_run: Option<DateTime<Utc>>,
}

fn duration_from_str<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(de)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

pub struct ScriptRunner {
    base_dir: PathBuf,
    configs: Mutex<HashMap<String, ScriptsConfig>>,
}

impl ScriptRunner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        ScriptRunner {
            base_dir: base_dir.into(),
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Runs every due script for every running server. Configuration files
    /// are re-read each pass and merged with in-memory last-run tracking;
    /// a server without a descriptor is skipped.
    pub async fn tick(&self, running: &[String]) -> Result<()> {
        let mut errs = Vec::new();
        for server in running {
            if let Err(err) = self.run_for_server(server).await {
                errs.push(err.context(format!("running extra scripts for {server:?}")));
            }
        }
        join_errors(errs)
    }

    async fn run_for_server(&self, server: &str) -> Result<()> {
        let server_dir = common::server_dir(&self.base_dir, server);
        let Some(fresh) = read_config(&server_dir.join(CONFIG_FILE))? else {
            debug!(server, "no extra scripts configured");
            return Ok(());
        };

        let due: Vec<ExtraScript> = {
            let mut configs = self.configs.lock().expect("script config lock poisoned");
            let current = configs.entry(server.to_string()).or_default();
            merge_config(current, fresh);

            let now = Utc::now();
            current
                .scripts
                .iter_mut()
                .filter(|script| is_due(script, now))
                .map(|script| {
                    script.last_run = Some(now);
                    script.clone()
                })
                .collect()
        };

        let mut errs = Vec::new();
        for script in due {
            debug!(server, script = %script.name, "running extra script");
            let path = server_dir.join(SCRIPTS_DIR).join(&script.name);
            match Command::new(&path).current_dir(&server_dir).spawn() {
                Ok(mut child) => {
                    // Reap in the background; scripts run on their own.
                    tokio::spawn(async move {
                        if let Err(err) = child.wait().await {
                            warn!(error = %err, "extra script wait failed");
                        }
                    });
                }
                Err(err) => errs.push(anyhow!(
                    "launching script {}: {err}",
                    path.display()
                )),
            }
        }
        join_errors(errs)
    }
}

fn is_due(script: &ExtraScript, now: DateTime<Utc>) -> bool {
    let interval = ChronoDuration::from_std(script.interval).unwrap_or(ChronoDuration::MAX);
    match script.last_run {
        None => true,
        Some(last) => now.signed_duration_since(last) >= interval,
    }
}

/// Reads the descriptor; absent file means no scripts, not an error.
fn read_config(path: &PathBuf) -> Result<Option<ScriptsConfig>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", path.display()));
        }
    };
    let config: ScriptsConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("unmarshaling {}", path.display()))?;
    Ok(Some(config))
}

/// Updates the in-memory configuration from a freshly read one: new scripts
/// are added, removed scripts dropped, and surviving scripts keep their
/// tracked last-run while taking the new interval.
fn merge_config(current: &mut ScriptsConfig, fresh: ScriptsConfig) {
    let mut merged = Vec::with_capacity(fresh.scripts.len());
    for mut script in fresh.scripts {
        if let Some(existing) = current.scripts.iter().find(|s| s.name == script.name) {
            script.last_run = existing.last_run.or(script.last_run);
        }
        merged.push(script);
    }
    current.scripts = merged;
}

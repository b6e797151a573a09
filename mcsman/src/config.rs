use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

/// Runtime configuration for the manager daemon.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory containing one subdirectory per server, plus the
    /// persisted status files.
    pub base_dir: PathBuf,
    /// Path of the local command socket.
    pub socket_path: PathBuf,
    /// Read/write deadline for local command connections.
    pub command_timeout: Duration,
    /// Lowest port assignable to a server. Further servers count up from it.
    pub base_port: u16,
    /// Host queried for live player counts.
    pub query_host: String,
    /// How long a stopping server may linger before it is force-killed.
    pub kill_timeout: Duration,
    /// Interval between running-set polls while waiting for a stop.
    pub stop_poll_interval: Duration,
    /// Window after a crash report during which recovery fires.
    pub recovery_window: Duration,
    /// Player-count query failures within this span of a start are ignored.
    pub boot_grace: Duration,
    /// Interval of the crash-recovery/reconciliation loop.
    pub recovery_interval: Duration,
    /// Interval of the activity-polling loop.
    pub status_interval: Duration,
    /// Interval of the extra-scripts loop.
    pub script_interval: Duration,
    /// Remote TLS listener, absent unless enabled.
    pub tls: Option<TlsConfig>,
}

/// Settings for the optional remote TLS listener.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub port: u16,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub timeout: Duration,
    /// Bucket remote-triggered backups are uploaded to.
    pub bucket: String,
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = PathBuf::from("/etc/minecraft/modpacks");
        Config {
            socket_path: PathBuf::from("/etc/minecraft/manager"),
            base_dir,
            command_timeout: Duration::from_secs(300),
            base_port: 25565,
            query_host: "127.0.0.1".to_string(),
            kill_timeout: Duration::from_secs(15),
            stop_poll_interval: Duration::from_secs(1),
            recovery_window: Duration::from_secs(30),
            boot_grace: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(1),
            script_interval: Duration::from_secs(60),
            tls: None,
        }
    }
}

/// Parses a human duration string such as `500ms`, `15s`, `5m` or `2h`.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    if digits.is_empty() {
        bail!("invalid duration {text:?}: missing value");
    }
    let value: u64 = digits.parse()?;
    let millis = match unit {
        "ms" => value,
        "s" | "" => value * 1_000,
        "m" => value * 60_000,
        "h" => value * 3_600_000,
        other => bail!("invalid duration {text:?}: unknown unit {other:?}"),
    };
    Ok(Duration::from_millis(millis))
}

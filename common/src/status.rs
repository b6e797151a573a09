use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File under the base directory holding the persisted server-status map.
pub const SERVER_INFO_FILE: &str = "server.info";
/// File under the base directory holding the persisted backup-eligibility map.
pub const BACKUP_LOCK_FILE: &str = "backup.lock";

/// Recorded state for one managed server. One entry per name; entries are
/// created on first start and never deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server name, which is also its directory name under the base dir.
    pub name: String,
    /// Operator intent: whether the server is expected to be running.
    #[serde(rename = "should-run", default)]
    pub should_run: bool,
    /// Assigned listen port. Unique across all registered servers.
    #[serde(default)]
    pub port: u16,
    /// Time of the most recent start. None while stopped.
    #[serde(rename = "start-time", default)]
    pub start_time: Option<DateTime<Utc>>,
    /// True only while a crash-recovery attempt is in flight. Guards
    /// against duplicate recovery triggers; cleared by the task that set it.
    #[serde(default)]
    pub recovering: bool,
}

impl ServerStatus {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        ServerStatus {
            name: name.into(),
            port,
            ..Default::default()
        }
    }
}

/// Location of a server's files under the base directory.
pub fn server_dir(base: &Path, server: &str) -> PathBuf {
    base.join(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn status_round_trips_through_json() {
        let mut statuses = HashMap::new();
        statuses.insert(
            "alpha".to_string(),
            ServerStatus {
                name: "alpha".to_string(),
                should_run: true,
                port: 25565,
                start_time: Some(Utc::now()),
                recovering: false,
            },
        );
        let encoded = serde_json::to_string(&statuses).unwrap();
        let decoded: HashMap<String, ServerStatus> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(statuses, decoded);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let decoded: ServerStatus = serde_json::from_str(r#"{"name":"beta"}"#).unwrap();
        assert_eq!(decoded.name, "beta");
        assert!(!decoded.should_run);
        assert_eq!(decoded.port, 0);
        assert!(decoded.start_time.is_none());
    }
}

//! Wire form of the command protocol.
//!
//! Requests travel as a single whitespace-delimited text buffer
//! (`<domain> <action> [args...]`) and are decoded into [`Request`] at the
//! transport boundary, so dispatch inside the daemon is an exhaustive match
//! rather than string comparison. Responses travel back as one JSON object.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A decoded command request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ServerStart(Vec<String>),
    ServerStop(Vec<String>),
    ServerRestart(Vec<String>),
    ServerInfo,
    BackupCreate(BackupRequest),
    BackupInfo,
}

/// Payload of a `backup create` request, JSON-encoded in the request text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    /// Back up the listed servers regardless of their stored eligibility.
    #[serde(default)]
    pub force: bool,
    /// Destination bucket URL, e.g. `gs://my-bucket/backups`.
    pub bucket: String,
    /// Archive only; skip the upload step.
    #[serde(default)]
    pub skip_upload: bool,
    /// Server names, or the sentinel `all`.
    pub servers: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ParseRequestError {
    #[error("empty request")]
    Empty,
    #[error("unknown request domain {0:?}")]
    UnknownDomain(String),
    #[error("unknown {domain} action {action:?}")]
    UnknownAction { domain: &'static str, action: String },
    #[error("missing {0} action")]
    MissingAction(&'static str),
    #[error("invalid backup payload: {0}")]
    BadPayload(#[from] serde_json::Error),
}

impl Request {
    /// Decodes the text form of a request.
    pub fn parse(text: &str) -> Result<Self, ParseRequestError> {
        let mut fields = text.split_whitespace();
        let domain = fields.next().ok_or(ParseRequestError::Empty)?;
        match domain {
            "server" => {
                let action = fields
                    .next()
                    .ok_or(ParseRequestError::MissingAction("server"))?;
                let servers: Vec<String> = fields.map(str::to_string).collect();
                match action {
                    "start" => Ok(Request::ServerStart(servers)),
                    "stop" => Ok(Request::ServerStop(servers)),
                    "restart" => Ok(Request::ServerRestart(servers)),
                    "info" => Ok(Request::ServerInfo),
                    other => Err(ParseRequestError::UnknownAction {
                        domain: "server",
                        action: other.to_string(),
                    }),
                }
            }
            "backup" => {
                let action = fields
                    .next()
                    .ok_or(ParseRequestError::MissingAction("backup"))?;
                match action {
                    "create" => {
                        // The remainder of the buffer is one JSON payload.
                        let payload = text
                            .trim_start()
                            .strip_prefix("backup")
                            .and_then(|rest| rest.trim_start().strip_prefix("create"))
                            .map(str::trim)
                            .unwrap_or_default();
                        Ok(Request::BackupCreate(serde_json::from_str(payload)?))
                    }
                    "info" => Ok(Request::BackupInfo),
                    other => Err(ParseRequestError::UnknownAction {
                        domain: "backup",
                        action: other.to_string(),
                    }),
                }
            }
            other => Err(ParseRequestError::UnknownDomain(other.to_string())),
        }
    }

    /// Encodes the request into its text form.
    pub fn encode(&self) -> String {
        match self {
            Request::ServerStart(servers) => join_fields("server start", servers),
            Request::ServerStop(servers) => join_fields("server stop", servers),
            Request::ServerRestart(servers) => join_fields("server restart", servers),
            Request::ServerInfo => "server info".to_string(),
            Request::BackupCreate(req) => {
                // Serializing a plain struct cannot fail.
                let payload = serde_json::to_string(req).unwrap_or_default();
                format!("backup create {payload}")
            }
            Request::BackupInfo => "backup info".to_string(),
        }
    }
}

fn join_fields(prefix: &str, servers: &[String]) -> String {
    let mut out = prefix.to_string();
    for server in servers {
        out.push(' ');
        out.push_str(server);
    }
    out
}

/// The single JSON object written back on every completed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// 0 on success; one of the fixed nonzero codes otherwise.
    #[serde(rename = "Status")]
    pub status: i32,
    /// Human-readable summary, informational on success.
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl Response {
    /// Error from the underlying transport.
    pub fn conn_error() -> Self {
        Response {
            status: 101,
            message: "Connection error".to_string(),
        }
    }

    /// The deadline elapsed before a valid request was read.
    pub fn timeout() -> Self {
        Response {
            status: 102,
            message: "Connection timeout before reading valid request".to_string(),
        }
    }

    /// Unknown error while reading or parsing the request.
    pub fn internal_error() -> Self {
        Response {
            status: 400,
            message: "The command server encountered an internal error trying to respond to your request"
                .to_string(),
        }
    }

    /// The requested command does not exist on this listener.
    pub fn not_found() -> Self {
        Response {
            status: 404,
            message: "The requested command does not exist or is not supported".to_string(),
        }
    }

    /// Outcome of dispatching a request: success carries the informational
    /// message, failure carries the aggregated error text under code 103.
    pub fn execution(msg: String, result: Result<(), impl std::fmt::Display>) -> Self {
        match result {
            Ok(()) => Response {
                status: 0,
                message: msg,
            },
            Err(err) => Response {
                status: 103,
                message: format!("Failed to execute command: {err}"),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

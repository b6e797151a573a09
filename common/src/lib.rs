//! Types shared between the manager daemon and the control CLI.

pub mod protocol;
pub mod status;

pub use protocol::{BackupRequest, ParseRequestError, Request, Response};
pub use status::{BACKUP_LOCK_FILE, SERVER_INFO_FILE, ServerStatus, server_dir};

//! Thin abstraction over the detachable terminal sessions hosting each
//! server process. The real driver shells out to GNU screen; everything
//! above it depends only on the trait so tests can simulate sessions.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Suffix of managed session names (`<pid>.<server>.server`).
const SESSION_SUFFIX: &str = "server";

#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Names of the servers with an active managed session. No sessions at
    /// all is an empty set, not an error.
    async fn list_running(&self) -> Result<Vec<String>>;

    /// Spawns a new detached session running `entrypoint` from `dir`. The
    /// session must outlive the manager's own lifetime.
    async fn launch(&self, server: &str, dir: &Path, entrypoint: &str) -> Result<()>;

    /// Injects one line of input into the session's controlling terminal.
    async fn send_line(&self, server: &str, line: &str) -> Result<()>;

    /// Hard-kills the session.
    async fn terminate(&self, server: &str) -> Result<()>;
}

/// [`SessionDriver`] backed by GNU screen.
pub struct ScreenDriver;

#[async_trait]
impl SessionDriver for ScreenDriver {
    async fn list_running(&self) -> Result<Vec<String>> {
        // screen -ls exits nonzero when no sessions exist; only a failure
        // to execute the binary itself is an error.
        let output = Command::new("screen")
            .arg("-ls")
            .stdin(Stdio::null())
            .output()
            .await
            .context("running screen -ls")?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(parse_session_list(&listing))
    }

    async fn launch(&self, server: &str, dir: &Path, entrypoint: &str) -> Result<()> {
        debug!(server, dir = %dir.display(), "launching session");
        // -d -m detaches immediately; the session is its own process group
        // and survives the manager stopping.
        let status = Command::new("screen")
            .args(["-S", &format!("{server}.{SESSION_SUFFIX}"), "-d", "-m", entrypoint])
            .current_dir(dir)
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("launching session for {server:?}"))?;
        if !status.success() {
            bail!("screen exited with {status} launching {server:?}");
        }
        Ok(())
    }

    async fn send_line(&self, server: &str, line: &str) -> Result<()> {
        let status = Command::new("screen")
            .args(["-S", server, "-X", "stuff", &format!("{line}\r")])
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("sending input to {server:?}"))?;
        if !status.success() {
            bail!("screen exited with {status} sending input to {server:?}");
        }
        Ok(())
    }

    async fn terminate(&self, server: &str) -> Result<()> {
        let status = Command::new("screen")
            .args(["-S", server, "-X", "quit"])
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("force-killing session {server:?}"))?;
        if !status.success() {
            bail!("screen exited with {status} force-killing {server:?}");
        }
        Ok(())
    }
}

/// Extracts server names from `screen -ls` output. Managed sessions are
/// named `<pid>.<server>.server`; anything else is ignored.
fn parse_session_list(listing: &str) -> Vec<String> {
    let mut servers = Vec::new();
    for line in listing.lines() {
        let Some(session) = line.split_whitespace().next() else {
            continue;
        };
        let parts: Vec<&str> = session.split('.').collect();
        if parts.len() == 3 && parts[2] == SESSION_SUFFIX && parts[0].parse::<u32>().is_ok() {
            servers.push(parts[1].to_string());
        }
    }
    servers
}

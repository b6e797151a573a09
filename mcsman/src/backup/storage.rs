//! Object-storage boundary. Destinations are `gs://bucket[/prefix]` URLs,
//! validated before any backup work starts; the real uploader shells out to
//! the cloud CLI so the daemon needs no credentials of its own.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
#[error("invalid backup destination {dest:?}: {reason}")]
pub struct InvalidDestination {
    pub dest: String,
    pub reason: &'static str,
}

/// A parsed object-storage destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsUrl {
    pub bucket: String,
    /// Optional path prefix inside the bucket, without surrounding slashes.
    pub prefix: String,
}

impl GcsUrl {
    pub fn parse(dest: &str) -> Result<Self, InvalidDestination> {
        let invalid = |reason| InvalidDestination {
            dest: dest.to_string(),
            reason,
        };
        let rest = dest
            .strip_prefix("gs://")
            .ok_or_else(|| invalid("missing gs:// scheme"))?;
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(invalid("empty bucket name"));
        }
        if bucket.contains(|c: char| !c.is_ascii_alphanumeric() && !"-_.".contains(c)) {
            return Err(invalid("bucket contains invalid characters"));
        }
        Ok(GcsUrl {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Full `gs://` URL of an object under this destination.
    pub fn object_url(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("gs://{}/{key}", self.bucket)
        } else {
            format!("gs://{}/{}/{key}", self.bucket, self.prefix)
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads a local file to `dest` under `key`.
    async fn upload(&self, local: &Path, dest: &GcsUrl, key: &str) -> Result<()>;
}

/// [`ObjectStore`] shelling out to `gcloud storage cp`.
pub struct GcloudCli;

#[async_trait]
impl ObjectStore for GcloudCli {
    async fn upload(&self, local: &Path, dest: &GcsUrl, key: &str) -> Result<()> {
        let target = dest.object_url(key);
        info!(local = %local.display(), target, "uploading backup");
        let output = Command::new("gcloud")
            .arg("storage")
            .arg("cp")
            .arg(local)
            .arg(&target)
            .stdin(Stdio::null())
            .output()
            .await
            .context("running gcloud storage cp")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "uploading {} to {target} failed with {}: {}",
                local.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

//! Archiving of a server's world directory into a single `.tar.gz`
//! artifact.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;

/// Archives the whole tree under `src` into a gzipped tarball at `dest`.
/// Entry paths inside the archive are relative to `src`.
pub fn archive_dir(src: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("creating archive {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", src)
        .with_context(|| format!("archiving {}", src.display()))?;
    builder
        .into_inner()
        .context("finishing archive")?
        .finish()
        .context("flushing archive")?;
    Ok(())
}

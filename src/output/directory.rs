//! Local directory sink
//!
//! Files are written to a temporary file in the target directory and then
//! renamed into place, so an interrupted run never leaves a partial report.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use super::ArtifactSink;

pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

/// Write `body` to `path` via a sibling temp file and an atomic rename.
pub fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    stage(path, body)?
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move report into {}", path.display()))?;

    debug!("Wrote {} bytes to {}", body.len(), path.display());
    Ok(())
}

/// Like [`write_atomic`], but fails if `path` already exists.
pub fn write_new(path: &Path, body: &[u8]) -> Result<()> {
    stage(path, body)?
        .persist_noclobber(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Refusing to overwrite {}", path.display()))?;

    debug!("Created {} ({} bytes)", path.display(), body.len());
    Ok(())
}

/// Flushed, world-readable temp file next to `path`
fn stage(path: &Path, body: &[u8]) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(body)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to flush {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(tmp)
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    fn describe(&self) -> String {
        self.directory.display().to_string()
    }

    async fn put(&self, name: &str, _content_type: &str, body: &[u8]) -> Result<String> {
        let path = self.directory.join(name);
        let body = body.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&target, &body))
            .await
            .context("Directory write task panicked")??;

        Ok(path.display().to_string())
    }
}

//! Filesystem operations on client working directories.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Create a directory and its parents if missing
pub async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

/// Create a directory that must not exist yet
pub async fn create_exclusive(path: &Path) -> Result<()> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(Error::DirectoryExists(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Recursively delete a directory. Returns `false` if it was already gone.
pub async fn remove_all(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed working directory");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move a working directory to a destination that must not exist
pub async fn promote(from: &Path, to: &Path) -> Result<()> {
    if !exists(from).await {
        return Err(Error::DirectoryMissing(from.to_path_buf()));
    }
    if exists(to).await {
        return Err(Error::DirectoryExists(to.to_path_buf()));
    }
    tokio::fs::rename(from, to).await?;
    debug!(from = %from.display(), to = %to.display(), "Moved working directory");
    Ok(())
}

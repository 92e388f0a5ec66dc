//! Exclusive lock file that serializes depot runs on one host.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Held lock; the file is removed on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Blocks until `path` can be created exclusively.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut waiting = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    tracing::info!(path = %path.display(), "acquired lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !waiting {
                        eprintln!("Waiting for lock file {}...", path.display());
                        waiting = true;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("creating lock file {}", path.display()));
                }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

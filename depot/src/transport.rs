//! Byte movers between work areas and the repository.
//!
//! Every transport merges: files are added or replaced at the destination,
//! nothing there is ever deleted.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use crate::{Error, Result};

/// Copies a directory tree into another, merging with what is already there.
pub trait Transport {
    /// Merges the tree at `source` into `destination`, creating it if needed.
    fn sync(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn sync(&self, source: &Path, destination: &Path) -> Result<()> {
        (**self).sync(source, destination)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Native recursive copy on the local filesystem.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// concurrent reader never observes a partially copied file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCopy;

impl Transport for LocalCopy {
    fn sync(&self, source: &Path, destination: &Path) -> Result<()> {
        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            "local copy"
        );
        copy_tree(source, destination).map_err(|e| Error::Transport {
            op: "copy",
            message: format!("{} -> {}: {e}", source.display(), destination.display()),
        })
    }

    fn describe(&self) -> String {
        "local".into()
    }
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    if !fs::metadata(source)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "source is not a directory",
        ));
    }
    fs::create_dir_all(destination)?;
    for dir_entry in fs::read_dir(source)? {
        let dir_entry = dir_entry?;
        let file_type = dir_entry.file_type()?;
        let from = dir_entry.path();
        let to = destination.join(dir_entry.file_name());
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            copy_file(&from, &to)?;
        }
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(to.file_name().unwrap_or_default());
    tmp_name.push(".tmp");
    let tmp = to.with_file_name(tmp_name);

    fs::copy(from, &tmp)?;
    if let Err(e) = fs::rename(&tmp, to) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    if fs::symlink_metadata(to).is_ok() {
        fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    copy_file(from, to)
}

/// `rsync -a` driven as a subprocess.
#[derive(Debug, Clone)]
pub struct Rsync {
    program: String,
}

impl Rsync {
    /// Uses `rsync` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("rsync")
    }

    /// Uses a specific rsync binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Rsync {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for Rsync {
    fn sync(&self, source: &Path, destination: &Path) -> Result<()> {
        let transport_err = |e: io::Error| Error::Transport {
            op: "rsync",
            message: e.to_string(),
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(transport_err)?;
        }

        // Trailing slashes: copy the contents of `source` into `destination`.
        let src = format!("{}/", source.display());
        let dst = format!("{}/", destination.display());
        tracing::debug!(%src, %dst, "rsync");
        let output = Command::new(&self.program)
            .args(["-a", &src, &dst])
            .output()
            .map_err(transport_err)?;
        if !output.status.success() {
            return Err(Error::Transport {
                op: "rsync",
                message: format!(
                    "{src} -> {dst}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.program.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_copy_merges() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("images/aa")).unwrap();
        fs::write(src.join("images/aa/json"), "new").unwrap();
        fs::create_dir_all(dst.join("images/bb")).unwrap();
        fs::write(dst.join("images/bb/json"), "kept").unwrap();

        LocalCopy.sync(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("images/aa/json")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dst.join("images/bb/json")).unwrap(), "kept");
    }

    #[test]
    fn local_copy_replaces_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("latest"), "two").unwrap();
        fs::write(dst.join("latest"), "one").unwrap();

        LocalCopy.sync(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("latest")).unwrap(), "two");
        let names: Vec<_> = fs::read_dir(&dst)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("latest")]);
    }

    #[test]
    fn local_copy_missing_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = LocalCopy
            .sync(&tmp.path().join("nope"), &tmp.path().join("dst"))
            .unwrap_err();
        assert!(matches!(err, Error::Transport { op: "copy", .. }));
    }

    #[test]
    fn rsync_missing_binary_fails() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        let err = Rsync::with_program("/nonexistent/rsync")
            .sync(&tmp.path().join("src"), &tmp.path().join("dst"))
            .unwrap_err();
        assert!(matches!(err, Error::Transport { op: "rsync", .. }));
    }
}

//! Owner-only permission hardening for work areas and repository trees.

use std::fs;
use std::io;
use std::path::Path;

/// Mode for directories: owner read/write/traverse.
const DIR_MODE: u32 = 0o700;
/// Mode for regular files: owner read/write.
const FILE_MODE: u32 = 0o600;

/// Recursively restricts `root` to its owner: directories `0700`, files `0600`.
///
/// Symlinks are neither followed nor modified.
pub fn harden(root: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(root)?;
    if meta.is_dir() {
        set_mode(root, DIR_MODE)?;
        for entry in fs::read_dir(root)? {
            harden(&entry?.path())?;
        }
    } else if meta.is_file() {
        set_mode(root, FILE_MODE)?;
    }
    Ok(())
}

/// Hardens `path` and every directory from it up to and including `root`.
pub fn harden_chain(root: &Path, path: &Path) -> io::Result<()> {
    let mut current = Some(path);
    while let Some(p) = current {
        if !p.starts_with(root) {
            break;
        }
        let mode = if fs::symlink_metadata(p)?.is_dir() {
            DIR_MODE
        } else {
            FILE_MODE
        };
        set_mode(p, mode)?;
        current = p.parent();
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

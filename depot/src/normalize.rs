//! Converts a flat engine export into the canonical repository layout.
//!
//! An export is a directory holding one subdirectory per layer id plus a
//! `repositories` (legacy) or `repositories.json` document. Normalizing it
//! moves the layers under `images/` and unrolls the document into the
//! file-per-tag index under `repositories/`. Every step is safe to re-run.

use std::fs;
use std::io;
use std::path::Path;

use crate::{LayerId, LayerStore, Placement, RefEntry, RepoIndex, Result, perms};

/// Directory holding layer directories in the canonical layout.
pub const IMAGES_DIR: &str = "images";
/// Index directory in the canonical layout; also the legacy document name.
pub const REPOSITORIES: &str = "repositories";
/// Bulk repository document name.
pub const REPOSITORIES_JSON: &str = "repositories.json";

/// What a normalization pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Normalized {
    /// Layers moved under `images/` by this pass.
    pub moved: Vec<LayerId>,
    /// Refs installed from the bulk document.
    pub refs: Vec<RefEntry>,
}

/// Normalizes the export at `work` in place.
pub fn normalize(work: &Path) -> Result<Normalized> {
    let store = LayerStore::new(work.join(IMAGES_DIR));
    fs::create_dir_all(store.root())?;

    // Collected up front: the loop moves entries out of `work`.
    let entries = fs::read_dir(work)?.collect::<io::Result<Vec<_>>>()?;
    let mut moved = Vec::new();
    for dir_entry in entries {
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }
        let Some(id) = dir_entry
            .file_name()
            .to_str()
            .and_then(|name| LayerId::parse(name).ok())
        else {
            continue;
        };
        if store.put(&id, &dir_entry.path())? == Placement::Inserted {
            moved.push(id);
        }
    }
    moved.sort();

    let legacy = work.join(REPOSITORIES);
    let document = work.join(REPOSITORIES_JSON);
    if fs::symlink_metadata(&legacy).is_ok_and(|m| !m.is_dir()) {
        fs::rename(&legacy, &document)?;
    }

    let refs = RepoIndex::new(legacy).import_bulk_file(&document)?;

    perms::harden(work)?;
    tracing::info!(layers = moved.len(), refs = refs.len(), "normalized export");
    Ok(Normalized { moved, refs })
}

//! Repository index: `(name, tag)` refs stored as one file per tag.
//!
//! ```text
//! {root}/
//!   alpine/
//!     3.18        holds the tip layer id
//!   org/app/
//!     latest
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::reference::{self, Reference};
use crate::{Error, LayerId, Result, perms};

/// One resolved ref in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct RefEntry {
    /// Repository name.
    pub name: String,
    /// Tag within the repository.
    pub tag: String,
    /// Tip layer the ref points to.
    pub id: LayerId,
}

/// Bulk `{ name: { tag: id } }` document written by engine export and read by import.
///
/// Only an interchange format: it is unrolled into the index and then deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Repositories(pub BTreeMap<String, BTreeMap<String, String>>);

impl Repositories {
    /// Builds a document holding exactly one ref.
    pub fn single(reference: &Reference, id: &LayerId) -> Self {
        let tags = BTreeMap::from([(reference.tag.clone(), id.to_string())]);
        Self(BTreeMap::from([(reference.name.clone(), tags)]))
    }

    /// Loads a document from disk; a missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the document as compact JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }
}

/// File-per-tag index of image refs.
#[derive(Debug, Clone)]
pub struct RepoIndex {
    root: PathBuf,
}

impl RepoIndex {
    /// Opens an index rooted at `root` (the repository's `repositories/` directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the index root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file that holds the id for `reference`.
    pub fn ref_path(&self, reference: &Reference) -> PathBuf {
        let mut path = self.root.clone();
        for segment in reference.name.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(&reference.tag);
        path
    }

    /// Returns the tip id `reference` points to.
    pub fn resolve(&self, reference: &Reference) -> Result<LayerId> {
        let path = self.ref_path(reference);
        match fs::read_to_string(&path) {
            Ok(content) => LayerId::parse(&content),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::IsADirectory
                ) =>
            {
                Err(Error::RefNotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Points `reference` at `id`, replacing any previous value atomically.
    pub fn write(&self, reference: &Reference, id: &LayerId) -> Result<()> {
        let path = self.ref_path(reference);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        // Readers see either the old id or the new one, never a partial file.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(id.as_str().as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        perms::harden_chain(&self.root, &path)?;
        tracing::debug!(%reference, %id, "wrote ref");
        Ok(())
    }

    /// Installs every valid ref in `doc`, skipping invalid names, tags, and ids.
    ///
    /// Returns the refs that were written.
    pub fn import_bulk(&self, doc: &Repositories) -> Result<Vec<RefEntry>> {
        let mut installed = Vec::new();
        for (name, tags) in &doc.0 {
            if !reference::is_valid_name(name) {
                tracing::warn!(name = %name, "skipping repository with invalid name");
                continue;
            }
            for (tag, raw_id) in tags {
                let Ok(reference) = Reference::new(name, tag) else {
                    tracing::warn!(name = %name, tag = %tag, "skipping invalid tag");
                    continue;
                };
                let Ok(id) = LayerId::parse(raw_id) else {
                    tracing::warn!(%reference, id = %raw_id, "skipping ref with invalid layer id");
                    continue;
                };
                self.write(&reference, &id)?;
                installed.push(RefEntry {
                    name: reference.name,
                    tag: reference.tag,
                    id,
                });
            }
        }
        Ok(installed)
    }

    /// Imports the bulk document at `path` (if any) and then deletes it.
    pub fn import_bulk_file(&self, path: &Path) -> Result<Vec<RefEntry>> {
        let doc = Repositories::load(path)?;
        fs::create_dir_all(&self.root)?;
        perms::harden_chain(&self.root, &self.root)?;
        let installed = self.import_bulk(&doc)?;
        if let Err(e) = fs::remove_file(path)
            && e.kind() != io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        Ok(installed)
    }

    /// Lists every ref in the index, sorted by name then tag.
    pub fn list(&self) -> Result<Vec<RefEntry>> {
        let mut entries = Vec::new();
        if self.root.is_dir() {
            self.collect(&self.root, &mut entries)?;
        }
        entries.sort_by(|a, b| (&a.name, &a.tag).cmp(&(&b.name, &b.tag)));
        Ok(entries)
    }

    fn collect(&self, dir: &Path, out: &mut Vec<RefEntry>) -> Result<()> {
        for dir_entry in fs::read_dir(dir)? {
            let path = dir_entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            // Skips in-flight temp files from `write`.
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| n.starts_with('.'))
            {
                continue;
            }
            let Some(entry) = self.entry_for(&path) else {
                tracing::warn!(path = %path.display(), "skipping unreadable ref file");
                continue;
            };
            out.push(entry);
        }
        Ok(())
    }

    fn entry_for(&self, path: &Path) -> Option<RefEntry> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let tag = rel.file_name()?.to_str()?.to_owned();
        let name = rel
            .parent()?
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        if name.is_empty() {
            return None;
        }
        let id = LayerId::parse(&fs::read_to_string(path).ok()?).ok()?;
        Some(RefEntry { name, tag, id })
    }
}

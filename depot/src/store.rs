//! Content-addressable layer storage.
//!
//! Each layer lives in a directory named by its id; the metadata document is
//! the `json` file inside it and everything else is opaque payload.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{Error, LayerId, Result};

/// Name of the metadata document inside a layer directory.
pub const METADATA_FILE: &str = "json";

/// Layer metadata document.
///
/// Only `id` and `parent` are interpreted; every other engine field is kept
/// verbatim in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct LayerMeta {
    /// The layer's own id; always equal to its storage key.
    pub id: LayerId,
    /// Parent layer, absent for the root of a lineage.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent: Option<LayerId>,
    /// Engine-specific fields passed through unexamined.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LayerMeta {
    /// Creates metadata with no extra fields.
    pub fn new(id: LayerId, parent: Option<LayerId>) -> Self {
        Self {
            id,
            parent,
            extra: Map::new(),
        }
    }
}

/// Some engines write `"parent": ""` for root layers.
fn empty_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<LayerId>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(|s| LayerId::parse(&s))
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Outcome of [`LayerStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Placement {
    /// The layer was moved into the store.
    Inserted,
    /// An identical layer was already stored; the source was discarded.
    AlreadyPresent,
}

/// Directory of id-keyed layers.
#[derive(Debug, Clone)]
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    /// Opens a store whose layer directories live directly under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding the layer's metadata and payload.
    pub fn payload_path(&self, id: &LayerId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Returns the path of the layer's metadata document.
    pub fn metadata_path(&self, id: &LayerId) -> PathBuf {
        self.payload_path(id).join(METADATA_FILE)
    }

    /// Returns the hidden sibling a layer is assembled in before it is published.
    ///
    /// [`Self::ids`] never lists it, so a half-copied layer stays invisible.
    pub fn staging_path(&self, id: &LayerId) -> PathBuf {
        self.root.join(format!(".{id}.partial"))
    }

    /// Clears any leftover staging directory for `id`.
    pub fn clear_staging(&self, id: &LayerId) -> Result<()> {
        match fs::remove_dir_all(self.staging_path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Publishes the fully assembled staging directory for `id`.
    ///
    /// The rename in [`Self::put`] makes metadata and payload appear together.
    pub fn commit_staging(&self, id: &LayerId) -> Result<Placement> {
        self.put(id, &self.staging_path(id))
    }

    /// Returns `true` if metadata for `id` is stored.
    pub fn contains(&self, id: &LayerId) -> bool {
        self.metadata_path(id).is_file()
    }

    /// Reads the metadata for `id`, or `None` if the layer is not stored.
    pub fn metadata(&self, id: &LayerId) -> Result<Option<LayerMeta>> {
        match read_metadata(&self.metadata_path(id)) {
            Ok(meta) => check_key(id, meta).map(Some),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Moves the layer directory `source` into the store under `id`.
    ///
    /// Storing an id whose metadata is already present and identical is a
    /// no-op that discards `source`; different metadata is a conflict.
    pub fn put(&self, id: &LayerId, source: &Path) -> Result<Placement> {
        let incoming = check_key(id, read_metadata(&source.join(METADATA_FILE))?)?;
        let target = self.payload_path(id);

        match self.metadata(id)? {
            Some(existing) if existing == incoming => {
                if source != target {
                    fs::remove_dir_all(source)?;
                }
                tracing::debug!(%id, "layer already stored");
                return Ok(Placement::AlreadyPresent);
            }
            Some(_) => return Err(Error::LayerConflict(id.clone())),
            None if target.exists() => {
                // Leftover from an interrupted run.
                fs::remove_dir_all(&target)?;
            }
            None => {}
        }

        fs::create_dir_all(&self.root)?;
        fs::rename(source, &target)?;
        tracing::debug!(%id, "stored layer");
        Ok(Placement::Inserted)
    }

    /// Lists the ids of all stored layers.
    pub fn ids(&self) -> Result<Vec<LayerId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for dir_entry in entries {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = dir_entry.file_name().to_str()
                && let Ok(id) = LayerId::parse(name)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn read_metadata(path: &Path) -> Result<LayerMeta> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn check_key(key: &LayerId, meta: LayerMeta) -> Result<LayerMeta> {
    if meta.id != *key {
        return Err(Error::MetadataMismatch {
            key: key.clone(),
            declared: meta.id,
        });
    }
    Ok(meta)
}

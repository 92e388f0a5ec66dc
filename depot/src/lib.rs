//! Serverless image distribution for a local container engine.
//!
//! Images are pushed into, and pulled from, a single shared repository laid
//! out on a filesystem:
//!
//! ```text
//! {repository}/
//!   images/
//!     {layer id}/
//!       json            layer metadata (`id`, optional `parent`, engine fields)
//!       layer.tar ...   opaque layer payload
//!   repositories/
//!     {name}/
//!       {tag}           plain-text file holding one layer id
//! ```
//!
//! A pull walks the parent chain of the requested tip and transfers only the
//! layers the local engine does not already have.

#![allow(clippy::missing_docs_in_private_items)]

pub mod config;
pub mod engine;
mod id;
pub mod index;
pub mod normalize;
mod perms;
pub mod reference;
pub mod store;
mod transfer;
pub mod transport;
pub mod walk;

pub use config::{Config, TransportKind};
pub use engine::{Docker, Engine, MemoryEngine};
pub use id::LayerId;
pub use index::{RefEntry, RepoIndex, Repositories};
pub use normalize::{Normalized, normalize};
pub use reference::Reference;
pub use store::{LayerMeta, LayerStore, Placement};
pub use transfer::{Depot, PullResult, PushResult};
pub use transport::{LocalCopy, Rsync, Transport};
pub use walk::{Layer, Walk, walk};

/// Result type for depot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from repository, engine, and transport operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested ref, or the tip layer it names, does not exist.
    #[error("not found: {0}")]
    RefNotFound(String),

    /// An image name contains characters outside `[A-Za-z0-9-/]`.
    #[error("invalid image name: {0:?}")]
    InvalidName(String),

    /// A tag is not of the form `[A-Za-z0-9_][A-Za-z0-9_.-]*`.
    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    /// A string is not a 40-character hexadecimal layer id.
    #[error("invalid layer id: {0:?}")]
    InvalidLayerId(String),

    /// The parent chain revisits a layer it already walked.
    #[error("cyclic lineage at layer {0}")]
    CyclicLineage(LayerId),

    /// A layer metadata document names a different id than its storage key.
    #[error("metadata for {key} declares id {declared}")]
    MetadataMismatch {
        /// Id the document is stored under.
        key: LayerId,
        /// Id written inside the document.
        declared: LayerId,
    },

    /// A layer id is already stored with different metadata.
    #[error("layer {0} already exists with different metadata")]
    LayerConflict(LayerId),

    /// Copying between the work area and the repository failed.
    #[error("transport {op} failed: {message}")]
    Transport {
        /// The transport step that failed.
        op: &'static str,
        /// Diagnostic output.
        message: String,
    },

    /// A container engine export, import, or presence query failed.
    #[error("engine {op} failed: {message}")]
    Engine {
        /// The engine capability that failed.
        op: &'static str,
        /// Diagnostic output.
        message: String,
    },

    /// Configuration could not be resolved.
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

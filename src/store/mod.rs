//! Collection-scoped persistence: configs, run state, stage checkpoints, and results.
//!
//! Everything lives under one artifact root:
//!
//! ```text
//! <root>/embedding_cache.json
//! <root>/<collection>/config.json
//! <root>/<collection>/collection.json
//! <root>/<collection>/latest_result.json
//! <root>/<collection>/results/<run_id>.json
//! <root>/<collection>/stages/<stage>.json
//! <root>/<collection>/index/...
//! ```

mod artifacts;
mod collections;

pub use artifacts::{ArtifactStore, write_atomic, write_json_atomic};
pub use collections::CollectionManager;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the artifact store and collection manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collection name is empty or would escape the artifact root.
    #[error("invalid collection name '{0}'")]
    InvalidCollectionName(String),
    /// No configuration is registered under the name.
    #[error("collection '{0}' is not registered")]
    UnknownCollection(String),
    /// A different configuration is already registered under the name.
    #[error("collection '{0}' is already registered with a different configuration")]
    AlreadyRegistered(String),
    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted file could not be encoded or decoded.
    #[error("failed to encode or decode {path}: {source}")]
    Serialization {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}

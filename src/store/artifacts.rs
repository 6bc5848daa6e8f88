use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};

use super::StoreError;
use crate::pipeline::{StageKind, StagePayload};

const EMBEDDING_CACHE_FILE: &str = "embedding_cache.json";

/// Path-addressed store rooted at one directory, with one subdirectory per collection.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    temp_root: PathBuf,
}

impl ArtifactStore {
    /// Store artifacts under `root` and per-run scratch directories under `temp_root`.
    pub fn new(root: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_root: temp_root.into(),
        }
    }

    /// Artifact root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the persisted embedding cache.
    pub fn embedding_cache_path(&self) -> PathBuf {
        self.root.join(EMBEDDING_CACHE_FILE)
    }

    /// Directory of `collection`, rejecting names that would escape the root.
    pub fn collection_dir(&self, collection: &str) -> Result<PathBuf, StoreError> {
        validate_collection_name(collection)?;
        Ok(self.root.join(collection))
    }

    /// Where the checkpoint of `stage` is stored for `collection`.
    pub fn checkpoint_path(&self, collection: &str, stage: StageKind) -> Result<PathBuf, StoreError> {
        Ok(self
            .collection_dir(collection)?
            .join("stages")
            .join(format!("{}.json", stage.as_str())))
    }

    /// Persist the output of a completed stage.
    pub async fn save_checkpoint(
        &self,
        collection: &str,
        stage: StageKind,
        payload: &StagePayload,
    ) -> Result<PathBuf, StoreError> {
        let path = self.checkpoint_path(collection, stage)?;
        write_json_atomic(&path, payload).await?;
        tracing::debug!(collection, stage = %stage, path = %path.display(), "Saved stage checkpoint");
        Ok(path)
    }

    /// Load a stage checkpoint, if one exists.
    pub async fn load_checkpoint(
        &self,
        collection: &str,
        stage: StageKind,
    ) -> Result<Option<StagePayload>, StoreError> {
        let path = self.checkpoint_path(collection, stage)?;
        read_json(&path).await
    }

    /// Create the scratch directory of one run.
    pub async fn create_temp_dir(&self, collection: &str, run_id: &str) -> Result<PathBuf, StoreError> {
        validate_collection_name(collection)?;
        let path = self.temp_root.join(format!("{collection}-{run_id}"));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|err| StoreError::io(&path, err))?;
        Ok(path)
    }

    /// Remove a run's scratch directory; failures are logged.
    pub async fn remove_temp_dir(&self, path: &Path) {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to remove temp directory");
            }
        }
    }
}

fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(StoreError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}

/// Write `bytes` to `path` through a sibling temporary file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("artifact");
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    tokio::fs::write(&temp_path, bytes).await?;
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| StoreError::serialization(path, err))?;
    write_atomic(path, &bytes)
        .await
        .map_err(|err| StoreError::io(path, err))
}

/// Read and decode a JSON file, returning `None` when it does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| StoreError::serialization(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IndexedCollection;

    fn store(dir: &tempfile::TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path().join("artifacts"), dir.path().join("tmp"))
    }

    #[test]
    fn rejects_names_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for name in ["", "  ", "..", ".", "a/b", "a\\b", "bad\nname"] {
            assert!(
                matches!(store.collection_dir(name), Err(StoreError::InvalidCollectionName(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(store.collection_dir("bhagavad-gita").is_ok());
    }

    #[tokio::test]
    async fn checkpoints_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let payload = StagePayload::Indexed(IndexedCollection {
            collection_name: "gita".into(),
            document_count: 3,
            ..Default::default()
        });

        assert!(store.load_checkpoint("gita", StageKind::Indexing).await.unwrap().is_none());
        let path = store.save_checkpoint("gita", StageKind::Indexing, &payload).await.unwrap();
        assert!(path.ends_with("gita/stages/indexing.json"));

        let loaded = store.load_checkpoint("gita", StageKind::Indexing).await.unwrap();
        assert_eq!(loaded, Some(payload));
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn temp_dirs_are_created_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let temp = store.create_temp_dir("gita", "run-1").await.unwrap();
        assert!(temp.is_dir());
        store.remove_temp_dir(&temp).await;
        assert!(!temp.exists());
        store.remove_temp_dir(&temp).await;
    }
}

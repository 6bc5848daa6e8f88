use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use super::artifacts::{ArtifactStore, read_json, write_json_atomic};
use super::StoreError;
use crate::pipeline::{Collection, CollectionConfig, PipelineResult};

const CONFIG_FILE: &str = "config.json";
const STATE_FILE: &str = "collection.json";
const LATEST_RESULT_FILE: &str = "latest_result.json";
const RESULTS_DIR: &str = "results";

/// Registers collection configurations and persists their run state and results.
#[derive(Debug, Clone)]
pub struct CollectionManager {
    store: Arc<ArtifactStore>,
}

impl CollectionManager {
    /// Manage collections inside `store`.
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Underlying artifact store.
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Register `config`.
    ///
    /// Registering an identical configuration again is a no-op that returns the current state;
    /// a different configuration under an existing name is refused.
    pub async fn register(&self, config: &CollectionConfig) -> Result<Collection, StoreError> {
        let dir = self.store.collection_dir(&config.name)?;
        let config_path = dir.join(CONFIG_FILE);

        if let Some(existing) = read_json::<CollectionConfig>(&config_path).await? {
            if &existing != config {
                return Err(StoreError::AlreadyRegistered(config.name.clone()));
            }
            return self.load_collection(&config.name).await;
        }

        write_json_atomic(&config_path, config).await?;
        let collection = Collection::new(&config.name);
        self.save_collection(&collection).await?;
        tracing::info!(collection = %config.name, sources = config.source_files.len(), "Registered collection");
        Ok(collection)
    }

    /// Registered configuration of `name`.
    pub async fn load_config(&self, name: &str) -> Result<CollectionConfig, StoreError> {
        let path = self.store.collection_dir(name)?.join(CONFIG_FILE);
        read_json(&path)
            .await?
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    /// Current run state of `name`.
    pub async fn load_collection(&self, name: &str) -> Result<Collection, StoreError> {
        let dir = self.store.collection_dir(name)?;
        if !tokio::fs::try_exists(dir.join(CONFIG_FILE))
            .await
            .map_err(|err| StoreError::io(&dir, err))?
        {
            return Err(StoreError::UnknownCollection(name.to_string()));
        }
        Ok(read_json(&dir.join(STATE_FILE))
            .await?
            .unwrap_or_else(|| Collection::new(name)))
    }

    /// Persist the run state of a collection.
    pub async fn save_collection(&self, collection: &Collection) -> Result<(), StoreError> {
        let path = self.store.collection_dir(&collection.name)?.join(STATE_FILE);
        write_json_atomic(&path, collection).await
    }

    /// Persist a run result under its run id and as the collection's latest result.
    pub async fn save_result(&self, result: &PipelineResult) -> Result<PathBuf, StoreError> {
        let dir = self.store.collection_dir(&result.collection_name)?;
        let path = dir.join(RESULTS_DIR).join(format!("{}.json", result.run_id));
        write_json_atomic(&path, result).await?;
        write_json_atomic(&dir.join(LATEST_RESULT_FILE), result).await?;
        Ok(path)
    }

    /// Most recent persisted result of `name`.
    pub async fn latest_result(&self, name: &str) -> Result<Option<PipelineResult>, StoreError> {
        let path = self.store.collection_dir(name)?.join(LATEST_RESULT_FILE);
        read_json(&path).await
    }

    /// Names of every registered collection, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let root = self.store.root();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(root, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(root, err))?
        {
            let path = entry.path();
            let registered = tokio::fs::try_exists(path.join(CONFIG_FILE))
                .await
                .map_err(|err| StoreError::io(&path, err))?;
            if registered && let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

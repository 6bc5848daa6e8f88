use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use super::EmbeddingError;
use crate::store::write_atomic;

/// Cache key of a `(model, text)` pair: hex SHA-256 of the model, a NUL separator, and the text.
pub fn cache_key(model: &str, text: &str) -> String {
    let digest = Sha256::new()
        .chain_update(model.as_bytes())
        .chain_update([0u8])
        .chain_update(text.as_bytes())
        .finalize();
    hex::encode(digest)
}

/// Process-wide embedding cache shared by concurrent runs.
///
/// Inserts keep the first vector stored under a key, so two runs racing on the same text both
/// end up with identical vectors. Each model's vector dimension is pinned by its first vector.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Arc<Vec<f32>>>>,
    dimensions: RwLock<HashMap<String, usize>>,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedCache {
    dimensions: HashMap<String, usize>,
    entries: HashMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored vector for `text` under `model`.
    pub fn get(&self, model: &str, text: &str) -> Option<Arc<Vec<f32>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key(model, text))
            .cloned()
    }

    /// Store `vector` unless the key is already present; returns the vector now cached.
    pub fn insert(&self, model: &str, text: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cache_key(model, text))
            .or_insert_with(|| Arc::new(vector))
            .clone()
    }

    /// Dimension pinned for `model`, if any vector was stored for it.
    pub fn dimension(&self, model: &str) -> Option<usize> {
        self.dimensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .copied()
    }

    /// Pin `dimension` for `model`, or check it against the pinned one.
    pub fn ensure_dimension(&self, model: &str, dimension: usize) -> Result<(), EmbeddingError> {
        let mut dimensions = self
            .dimensions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let expected = *dimensions.entry(model.to_string()).or_insert(dimension);
        if expected != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                model: model.to_string(),
                expected,
                actual: dimension,
            });
        }
        Ok(())
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a cache previously written by [`EmbeddingCache::save`]; a missing file yields an
    /// empty cache.
    pub async fn load(path: &Path) -> Result<Self, EmbeddingError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(persistence_error(path, err)),
        };
        let persisted: PersistedCache =
            serde_json::from_slice(&bytes).map_err(|err| persistence_error(path, err))?;

        tracing::debug!(path = %path.display(), entries = persisted.entries.len(), "Loaded embedding cache");
        Ok(Self {
            entries: RwLock::new(
                persisted
                    .entries
                    .into_iter()
                    .map(|(key, vector)| (key, Arc::new(vector)))
                    .collect(),
            ),
            dimensions: RwLock::new(persisted.dimensions),
        })
    }

    /// Persist the cache atomically to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), EmbeddingError> {
        let persisted = PersistedCache {
            dimensions: self
                .dimensions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(key, vector)| (key.clone(), vector.as_ref().clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&persisted).map_err(|err| persistence_error(path, err))?;
        write_atomic(path, &bytes)
            .await
            .map_err(|err| persistence_error(path, err))?;
        tracing::debug!(path = %path.display(), entries = persisted.entries.len(), "Saved embedding cache");
        Ok(())
    }
}

fn persistence_error(path: &Path, err: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::CachePersistence {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_model_and_text() {
        assert_eq!(cache_key("m", "text"), cache_key("m", "text"));
        assert_ne!(cache_key("m", "text"), cache_key("n", "text"));
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert_eq!(cache_key("m", "text").len(), 64);
    }

    #[test]
    fn first_insert_wins() {
        let cache = EmbeddingCache::new();
        let first = cache.insert("m", "om", vec![1.0, 0.0]);
        let second = cache.insert("m", "om", vec![0.0, 1.0]);
        assert_eq!(first, second);
        assert_eq!(cache.get("m", "om").unwrap().as_slice(), &[1.0, 0.0]);
        assert!(cache.get("other", "om").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn dimension_is_pinned_per_model() {
        let cache = EmbeddingCache::new();
        cache.ensure_dimension("m", 4).unwrap();
        cache.ensure_dimension("m", 4).unwrap();
        cache.ensure_dimension("n", 8).unwrap();

        let error = cache.ensure_dimension("m", 3).unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::DimensionMismatch { expected: 4, actual: 3, .. }
        ));
        assert_eq!(cache.dimension("n"), Some(8));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let empty = EmbeddingCache::load(&path).await.unwrap();
        assert!(empty.is_empty());

        let cache = EmbeddingCache::new();
        cache.ensure_dimension("m", 2).unwrap();
        cache.insert("m", "om", vec![0.5, 0.5]);
        cache.save(&path).await.unwrap();

        let reloaded = EmbeddingCache::load(&path).await.unwrap();
        assert_eq!(reloaded.get("m", "om").unwrap().as_slice(), &[0.5, 0.5]);
        assert_eq!(reloaded.dimension("m"), Some(2));
    }
}

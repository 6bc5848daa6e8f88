use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{EmbeddingCache, EmbeddingClient, EmbeddingError};

/// Batching and concurrency limits for [`EmbeddingService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingSettings {
    /// Texts per backend call.
    pub batch_size: usize,
    /// Backend calls in flight at once.
    pub workers: usize,
    /// Upper bound on one backend call.
    pub timeout: Duration,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            workers: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Vectors for one call to [`EmbeddingService::generate_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmbedding {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Texts served from the cache.
    pub cache_hits: usize,
    /// Texts sent to the backend.
    pub cache_misses: usize,
    /// Dimension of every vector, `0` when no vector was produced.
    pub dimension: usize,
}

/// Lifetime counters of an [`EmbeddingService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    /// Cache hits across every call.
    pub cache_hits: u64,
    /// Cache misses across every call.
    pub cache_misses: u64,
    /// Vectors currently cached.
    pub cached_vectors: usize,
}

/// Deterministic text-to-vector function with a shared cache in front of a backend client.
pub struct EmbeddingService {
    client: Arc<dyn EmbeddingClient>,
    cache: Arc<EmbeddingCache>,
    settings: EmbeddingSettings,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl EmbeddingService {
    /// Wrap `client` with `cache`.
    pub fn new(
        client: Arc<dyn EmbeddingClient>,
        cache: Arc<EmbeddingCache>,
        settings: EmbeddingSettings,
    ) -> Self {
        Self {
            client,
            cache,
            settings: EmbeddingSettings {
                batch_size: settings.batch_size.max(1),
                workers: settings.workers.max(1),
                timeout: settings.timeout,
            },
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Shared cache.
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cached_vectors: self.cache.len(),
        }
    }

    /// Embed `texts` with `model`, consulting the cache first.
    ///
    /// Misses are sent to the backend in `batch_size` chunks, up to `workers` at once, and
    /// merged back in input order. A text repeated within `texts` is a miss the first time and
    /// a hit afterwards, so `cache_hits + cache_misses == texts.len()`.
    pub async fn generate_batch(
        &self,
        model: &str,
        texts: &[String],
    ) -> Result<BatchEmbedding, EmbeddingError> {
        let mut slots: Vec<Option<Arc<Vec<f32>>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, &str)> = Vec::new();
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut repeats: Vec<(usize, usize)> = Vec::new();
        let mut cache_hits = 0usize;

        for (slot, text) in texts.iter().enumerate() {
            if let Some(vector) = self.cache.get(model, text) {
                slots[slot] = Some(vector);
                cache_hits += 1;
            } else if let Some(&pending_idx) = first_seen.get(text.as_str()) {
                repeats.push((slot, pending_idx));
                cache_hits += 1;
            } else {
                first_seen.insert(text.as_str(), pending.len());
                pending.push((slot, text.as_str()));
            }
        }
        let cache_misses = pending.len();

        let chunks: Vec<Vec<String>> = pending
            .chunks(self.settings.batch_size)
            .map(|chunk| chunk.iter().map(|(_, text)| (*text).to_string()).collect())
            .collect();
        let chunk_count = chunks.len();

        let responses: Vec<Result<Vec<Vec<f32>>, EmbeddingError>> = stream::iter(chunks)
            .map(|chunk| self.embed_chunk(model, chunk))
            .buffered(self.settings.workers)
            .collect()
            .await;

        let mut computed: Vec<Arc<Vec<f32>>> = Vec::with_capacity(pending.len());
        let mut pending_iter = pending.iter();
        for response in responses {
            for vector in response? {
                let Some(&(slot, text)) = pending_iter.next() else {
                    return Err(EmbeddingError::CountMismatch {
                        expected: pending.len(),
                        actual: computed.len() + 1,
                    });
                };
                self.cache.ensure_dimension(model, vector.len())?;
                let stored = self.cache.insert(model, text, vector);
                slots[slot] = Some(Arc::clone(&stored));
                computed.push(stored);
            }
        }

        for (slot, pending_idx) in repeats {
            slots[slot] = computed.get(pending_idx).cloned();
        }

        let vectors: Vec<Vec<f32>> = slots
            .into_iter()
            .map(|slot| slot.map(|vector| vector.as_ref().clone()))
            .collect::<Option<_>>()
            .ok_or(EmbeddingError::CountMismatch {
                expected: cache_misses,
                actual: computed.len(),
            })?;

        let dimension = vectors
            .first()
            .map(Vec::len)
            .or_else(|| self.cache.dimension(model))
            .unwrap_or(0);
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                model: model.to_string(),
                expected: dimension,
                actual: vector.len(),
            });
        }

        self.cache_hits
            .fetch_add(cache_hits as u64, Ordering::Relaxed);
        self.cache_misses
            .fetch_add(cache_misses as u64, Ordering::Relaxed);
        tracing::debug!(
            model,
            texts = texts.len(),
            cache_hits,
            cache_misses,
            backend_calls = chunk_count,
            "Generated embedding batch"
        );

        Ok(BatchEmbedding {
            vectors,
            cache_hits,
            cache_misses,
            dimension,
        })
    }

    async fn embed_chunk(
        &self,
        model: &str,
        chunk: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = chunk.len();
        let vectors = tokio::time::timeout(
            self.settings.timeout,
            self.client.generate_embeddings(model, chunk),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout(self.settings.timeout))??;

        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClientError, HashingEmbeddingClient};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingClient {
        inner: HashingEmbeddingClient,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingClient for RecordingClient {
        async fn generate_embeddings(
            &self,
            model: &str,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.calls.lock().unwrap().push(texts.clone());
            self.inner.generate_embeddings(model, texts).await
        }
    }

    struct SlowClient;

    #[async_trait]
    impl EmbeddingClient for SlowClient {
        async fn generate_embeddings(
            &self,
            _model: &str,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![0.0]; texts.len()])
        }
    }

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn service(client: Arc<dyn EmbeddingClient>, batch_size: usize) -> EmbeddingService {
        EmbeddingService::new(
            client,
            Arc::new(EmbeddingCache::new()),
            EmbeddingSettings {
                batch_size,
                workers: 3,
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn preserves_order_across_batches() {
        let client = Arc::new(RecordingClient {
            inner: HashingEmbeddingClient::new(16),
            calls: Mutex::new(Vec::new()),
        });
        let service = service(client.clone(), 2);
        let input = texts(&["a", "b", "c", "d", "e"]);

        let batch = service.generate_batch("m", &input).await.unwrap();
        let expected = HashingEmbeddingClient::new(16)
            .generate_embeddings("m", input.clone())
            .await
            .unwrap();

        assert_eq!(batch.vectors, expected);
        assert_eq!(batch.cache_misses, 5);
        assert_eq!(batch.dimension, 16);
        assert_eq!(client.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn second_call_hits_cache_with_identical_vectors() {
        let service = service(Arc::new(HashingEmbeddingClient::new(8)), 4);
        let first = service.generate_batch("m", &texts(&["om"])).await.unwrap();
        let second = service.generate_batch("m", &texts(&["om"])).await.unwrap();

        assert_eq!(first.cache_misses, 1);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.cache_misses, 0);
        assert_eq!(first.vectors, second.vectors);
        assert_eq!(service.stats().cache_hits, 1);
        assert_eq!(service.stats().cache_misses, 1);
    }

    #[tokio::test]
    async fn repeated_text_within_call_counts_one_miss() {
        let client = Arc::new(RecordingClient {
            inner: HashingEmbeddingClient::new(8),
            calls: Mutex::new(Vec::new()),
        });
        let service = service(client.clone(), 10);
        let batch = service
            .generate_batch("m", &texts(&["om", "shanti", "om"]))
            .await
            .unwrap();

        assert_eq!(batch.cache_misses, 2);
        assert_eq!(batch.cache_hits, 1);
        assert_eq!(batch.vectors[0], batch.vectors[2]);
        assert_eq!(client.calls.lock().unwrap()[0], texts(&["om", "shanti"]));
    }

    #[tokio::test]
    async fn dimension_change_is_fatal() {
        let cache = Arc::new(EmbeddingCache::new());
        let settings = EmbeddingSettings::default();
        let narrow = EmbeddingService::new(Arc::new(HashingEmbeddingClient::new(4)), cache.clone(), settings);
        let wide = EmbeddingService::new(Arc::new(HashingEmbeddingClient::new(6)), cache, settings);

        narrow.generate_batch("m", &texts(&["a"])).await.unwrap();
        let error = wide.generate_batch("m", &texts(&["b"])).await.unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::DimensionMismatch { expected: 4, actual: 6, .. }
        ));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let service = EmbeddingService::new(
            Arc::new(SlowClient),
            Arc::new(EmbeddingCache::new()),
            EmbeddingSettings {
                batch_size: 1,
                workers: 1,
                timeout: Duration::from_millis(50),
            },
        );
        let error = service.generate_batch("m", &texts(&["a"])).await.unwrap_err();
        assert!(matches!(error, EmbeddingError::Timeout(_)));
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let service = service(Arc::new(HashingEmbeddingClient::new(8)), 4);
        let batch = service.generate_batch("m", &[]).await.unwrap();
        assert!(batch.vectors.is_empty());
        assert_eq!(batch.dimension, 0);
    }
}

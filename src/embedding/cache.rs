//! Content-addressed embedding cache.
//!
//! Vectors are stored on disk as `<cache_dir>/<namespace>/<sha256(text)>.bin`
//! (little-endian `f32`, see [`vec_to_blob`](super::vec_to_blob)) and kept in
//! memory once loaded. Re-indexing unchanged documents therefore performs no
//! backend calls, even across process restarts.
//!
//! Concurrent [`EmbeddingCache::get_or_compute`] calls for the same text share
//! one computation: each key owns a `tokio::sync::OnceCell`, and callers that
//! arrive while it is being initialised wait for the first caller's result.
//! A failed computation leaves the cell empty so the next call retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::{Mutex, OnceCell};

use super::{blob_to_vec, vec_to_blob, EmbeddingError, EmbeddingProvider};
use crate::chunk::content_hash;

type Slot = Arc<OnceCell<Vec<f32>>>;

/// A batch miss: the text, where it appears in the input, and its cell.
struct Pending<'a> {
    key: String,
    text: &'a str,
    positions: Vec<usize>,
    slot: Slot,
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from memory or disk.
    pub hits: u64,
    /// Texts sent to the embedding backend.
    pub misses: u64,
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    dir: PathBuf,
    batch_size: usize,
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache storing vectors under `root/namespace`.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        root: &Path,
        namespace: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            dir: root.join(namespace),
            batch_size: batch_size.max(1),
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return the embedding for `text`, computing and persisting it on a miss.
    pub async fn get_or_compute(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = content_hash(text);
        let slot = self.slot(&key).await;

        if let Some(v) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(v.clone());
        }

        let v = slot
            .get_or_try_init(|| self.load_or_compute(&key, text))
            .await?;
        Ok(v.clone())
    }

    /// Resolve many texts at once, sending only the misses to the backend in
    /// batches of `batch_size`. Output order matches `texts`.
    ///
    /// Every miss is resolved through its key's cell, so a concurrent
    /// [`get_or_compute`](Self::get_or_compute) for the same text waits for
    /// the batch instead of calling the backend again.
    pub async fn get_or_compute_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<Pending<'_>> = Vec::new();
        let mut pending_pos: HashMap<String, usize> = HashMap::new();

        for (i, text) in texts.iter().enumerate() {
            let key = content_hash(text);

            // Repeats within one call share the first occurrence's vector.
            if let Some(&p) = pending_pos.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                pending[p].positions.push(i);
                continue;
            }

            let slot = self.slot(&key).await;
            if let Some(v) = slot.get() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                out[i] = Some(v.clone());
                continue;
            }
            if let Some(v) = self.read_disk(&key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let _ = slot.set(v.clone());
                out[i] = Some(v);
                continue;
            }

            pending_pos.insert(key.clone(), pending.len());
            pending.push(Pending {
                key,
                text: text.as_str(),
                positions: vec![i],
                slot,
            });
        }

        for batch in pending.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|p| p.text.to_string()).collect();
            // One backend call per batch, shared by every key's initialiser.
            let computed: OnceCell<Vec<Vec<f32>>> = OnceCell::new();

            let resolved = try_join_all(batch.iter().enumerate().map(|(j, p)| {
                let computed = &computed;
                let inputs = &inputs;
                async move {
                    let v = p
                        .slot
                        .get_or_try_init(|| async move {
                            let vectors = computed
                                .get_or_try_init(|| self.embed_batch(inputs))
                                .await?;
                            let v = vectors[j].clone();
                            self.write_disk(&p.key, &v).await?;
                            Ok::<_, EmbeddingError>(v)
                        })
                        .await?;
                    Ok::<_, EmbeddingError>(v.clone())
                }
            }))
            .await?;

            for (p, v) in batch.iter().zip(resolved) {
                for &i in &p.positions {
                    out[i] = Some(v.clone());
                }
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| EmbeddingError::Cache("unresolved embedding".to_string())))
            .collect()
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self.provider.embed(inputs).await?;
        if vectors.len() != inputs.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }
        self.misses
            .fetch_add(inputs.len() as u64, Ordering::Relaxed);
        Ok(vectors)
    }

    async fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    async fn load_or_compute(&self, key: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(v) = self.read_disk(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(v);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let v = super::embed_query(self.provider.as_ref(), text).await?;
        self.write_disk(key, &v).await?;
        Ok(v)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", key))
    }

    /// Unreadable or truncated entries count as misses.
    async fn read_disk(&self, key: &str) -> Option<Vec<f32>> {
        let bytes = tokio::fs::read(self.path_for(key)).await.ok()?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            tracing::warn!(key, "ignoring corrupt embedding cache entry");
            return None;
        }
        Some(blob_to_vec(&bytes))
    }

    async fn write_disk(&self, key: &str, v: &[f32]) -> Result<(), EmbeddingError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EmbeddingError::Cache(format!("{}: {}", self.dir.display(), e)))?;

        // Write then rename so readers never see a partial file.
        let path = self.path_for(key);
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", key, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, vec_to_blob(v))
            .await
            .map_err(|e| EmbeddingError::Cache(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| EmbeddingError::Cache(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Deterministic provider that counts embedded texts.
    struct CountingProvider {
        calls: AtomicUsize,
        texts: AtomicUsize,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                texts: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.bytes().map(|b| b as f32).sum::<f32>(), 1.0])
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Network("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let tmp = TempDir::new().unwrap();
        let provider = CountingProvider::new(Duration::ZERO);
        let cache = EmbeddingCache::new(provider.clone(), tmp.path(), "test", 8);

        let a = cache.get_or_compute("high-risk systems").await.unwrap();
        let b = cache.get_or_compute("high-risk systems").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_concurrent_same_key_computes_once() {
        let tmp = TempDir::new().unwrap();
        let provider = CountingProvider::new(Duration::from_millis(50));
        let cache = Arc::new(EmbeddingCache::new(provider.clone(), tmp.path(), "test", 8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_compute("same text").await.unwrap()
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persisted_across_instances() {
        let tmp = TempDir::new().unwrap();
        let first = CountingProvider::new(Duration::ZERO);
        let v1 = EmbeddingCache::new(first.clone(), tmp.path(), "test", 8)
            .get_or_compute("annex III")
            .await
            .unwrap();

        let second = CountingProvider::new(Duration::ZERO);
        let cache = EmbeddingCache::new(second.clone(), tmp.path(), "test", 8);
        let v2 = cache.get_or_compute("annex III").await.unwrap();

        assert_eq!(v1, v2);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let provider = CountingProvider::new(Duration::ZERO);
        EmbeddingCache::new(provider.clone(), tmp.path(), "model-a", 8)
            .get_or_compute("text")
            .await
            .unwrap();
        EmbeddingCache::new(provider.clone(), tmp.path(), "model-b", 8)
            .get_or_compute("text")
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let tmp = TempDir::new().unwrap();
        let failing = EmbeddingCache::new(Arc::new(FailingProvider), tmp.path(), "test", 8);
        assert!(matches!(
            failing.get_or_compute("x").await,
            Err(EmbeddingError::Network(_))
        ));
        assert!(failing.get_or_compute("x").await.is_err());
        assert!(std::fs::read_dir(failing.dir()).is_err());
    }

    #[tokio::test]
    async fn test_batch_only_embeds_misses() {
        let tmp = TempDir::new().unwrap();
        let provider = CountingProvider::new(Duration::ZERO);
        let cache = EmbeddingCache::new(provider.clone(), tmp.path(), "test", 2);

        cache.get_or_compute("b").await.unwrap();
        assert_eq!(provider.texts.load(Ordering::SeqCst), 1);

        let texts: Vec<String> = ["a", "b", "c", "a", "d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = cache.get_or_compute_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[0], vectors[3]);
        // "b" was cached; "a" is embedded once despite appearing twice.
        assert_eq!(provider.texts.load(Ordering::SeqCst), 4);
        // 3 misses at batch size 2 -> 2 calls, plus the single lookup.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let again = cache.get_or_compute_batch(&texts).await.unwrap();
        assert_eq!(again, vectors);
        assert_eq!(provider.texts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_single_lookup_waits_for_running_batch() {
        let tmp = TempDir::new().unwrap();
        let provider = CountingProvider::new(Duration::from_millis(200));
        let cache = Arc::new(EmbeddingCache::new(provider.clone(), tmp.path(), "test", 8));

        let batch = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute_batch(&["same".to_string(), "other".to_string()])
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let single = cache.get_or_compute("same").await.unwrap();
        let vectors = batch.await.unwrap();

        assert_eq!(single, vectors[0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.texts.load(Ordering::SeqCst), 2);
    }
}

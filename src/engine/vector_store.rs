use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::engine::text_key::descriptor_key;
use crate::metrics::METRICS;
use crate::models::{ProcessDescriptor, ProcessVector};
use crate::services::{EmbeddingCache, EmbeddingProvider};

type FetchResult = Result<Vec<f32>, Arc<anyhow::Error>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;
type BatchResult = Result<Arc<HashMap<String, Vec<f32>>>, Arc<anyhow::Error>>;
type SharedBatch = Shared<BoxFuture<'static, BatchResult>>;

/// State reachable from detached fetch futures.
struct StoreInner {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn EmbeddingCache>,
    vectors: RwLock<HashMap<String, ProcessVector>>,
    dimension: OnceLock<usize>,
}

impl StoreInner {
    fn in_memory(&self, key: &str) -> Option<Vec<f32>> {
        self.vectors
            .read()
            .ok()
            .and_then(|m| m.get(key).map(|v| v.embedding.clone()))
    }

    /// First accepted vector fixes the dimension for the whole store.
    fn validate(&self, key: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(anyhow!("empty embedding for '{key}'"));
        }
        let expected = *self.dimension.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(anyhow!(
                "embedding for '{key}' has dimension {}, expected {expected}",
                vector.len()
            ));
        }
        Ok(())
    }

    fn remember(&self, key: &str, vector: &[f32]) {
        if let Ok(mut m) = self.vectors.write() {
            m.insert(
                key.to_string(),
                ProcessVector {
                    key: key.to_string(),
                    embedding: vector.to_vec(),
                    text: key.to_string(),
                },
            );
        }
    }

    async fn from_cache(&self, key: &str) -> Option<Vec<f32>> {
        match self.cache.get(key).await {
            Ok(Some(v)) => match self.validate(key, &v) {
                Ok(()) => {
                    self.remember(key, &v);
                    METRICS.record_embedding_lookup("cache");
                    Some(v)
                }
                Err(e) => {
                    warn!("Ignoring cached embedding: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Embedding cache read for '{key}' failed: {e:#}");
                None
            }
        }
    }

    /// Persist then publish in memory. A failed cache write only costs a refetch later.
    async fn write_through(&self, key: &str, vector: &[f32]) {
        if let Err(e) = self.cache.put(key, vector).await {
            warn!("Embedding cache write for '{key}' failed: {e:#}");
        }
        self.remember(key, vector);
    }

    async fn fetch_one(self: Arc<Self>, key: String) -> FetchResult {
        if let Some(v) = self.from_cache(&key).await {
            return Ok(v);
        }
        debug!("Fetching embedding for '{key}'");
        METRICS.record_embedding_lookup("network");
        let mut out = self
            .provider
            .embed(std::slice::from_ref(&key))
            .await
            .map_err(|e| {
                METRICS.embedding_failures.inc();
                Arc::new(e)
            })?;
        if out.len() != 1 {
            METRICS.embedding_failures.inc();
            return Err(Arc::new(anyhow!(
                "provider returned {} vectors for one input",
                out.len()
            )));
        }
        let v = out.remove(0);
        self.validate(&key, &v).map_err(|e| {
            METRICS.embedding_failures.inc();
            Arc::new(e)
        })?;
        self.write_through(&key, &v).await;
        Ok(v)
    }

    async fn fetch_batch(self: Arc<Self>, keys: Vec<String>) -> BatchResult {
        debug!("Fetching {} embeddings in one request", keys.len());
        METRICS.record_embedding_lookup_n("network", keys.len());
        let vectors = self.provider.embed(&keys).await.map_err(|e| {
            METRICS.embedding_failures.inc();
            Arc::new(e)
        })?;
        if vectors.len() != keys.len() {
            METRICS.embedding_failures.inc();
            return Err(Arc::new(anyhow!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                keys.len()
            )));
        }
        let mut out = HashMap::with_capacity(keys.len());
        for (key, v) in keys.into_iter().zip(vectors) {
            match self.validate(&key, &v) {
                Ok(()) => {
                    self.write_through(&key, &v).await;
                    out.insert(key, v);
                }
                Err(e) => {
                    METRICS.embedding_failures.inc();
                    warn!("Dropping malformed embedding: {e}");
                }
            }
        }
        Ok(Arc::new(out))
    }
}

/// In-memory process-text index over the persistent cache and the remote
/// provider. Concurrent requests for one key share a single fetch.
pub struct VectorStore {
    inner: Arc<StoreInner>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    max_key_chars: usize,
    batch_size: usize,
}

impl VectorStore {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn EmbeddingCache>,
        max_key_chars: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                provider,
                cache,
                vectors: RwLock::new(HashMap::new()),
                dimension: OnceLock::new(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            max_key_chars,
            batch_size: batch_size.max(1),
        }
    }

    pub fn key_for(&self, descriptor: &ProcessDescriptor) -> String {
        descriptor_key(descriptor, self.max_key_chars)
    }

    /// Memory-only lookup; never suspends.
    pub fn vector_for_key(&self, key: &str) -> Option<Vec<f32>> {
        self.inner.in_memory(key)
    }

    /// Evicts in-memory vectors whose key is not in `live`. The persistent
    /// cache keeps them, so a returning command costs a cache read, not a fetch.
    pub fn retain_keys(&self, live: &HashSet<String>) -> usize {
        match self.inner.vectors.write() {
            Ok(mut m) => {
                let before = m.len();
                m.retain(|key, _| live.contains(key));
                before - m.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.vectors.read().map(|m| m.len()).unwrap_or(0)
    }

    pub async fn get_embedding(&self, descriptor: &ProcessDescriptor) -> Result<Vec<f32>> {
        self.get_by_key(self.key_for(descriptor)).await
    }

    async fn get_by_key(&self, key: String) -> Result<Vec<f32>> {
        if let Some(v) = self.inner.in_memory(&key) {
            METRICS.record_embedding_lookup("memory");
            return Ok(v);
        }

        let fetch = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| anyhow!("in-flight table lock poisoned"))?;
            // a fetch may have finished between the first check and taking the lock
            if let Some(v) = self.inner.in_memory(&key) {
                METRICS.record_embedding_lookup("memory");
                return Ok(v);
            }
            match in_flight.get(&key) {
                Some(f) => f.clone(),
                None => {
                    let f = self.inner.clone().fetch_one(key.clone()).boxed().shared();
                    in_flight.insert(key.clone(), f.clone());
                    f
                }
            }
        };

        let result = fetch.clone().await;
        self.release(&key, &fetch);
        result.map_err(|e| anyhow!("embedding for '{key}' unavailable: {e:#}"))
    }

    /// One key's slice of a batch. When the batch request fails as a whole,
    /// the key is fetched on its own so one bad text cannot fail the others.
    fn per_key_fetch(&self, batch: &SharedBatch, key: String, retry_alone: bool) -> SharedFetch {
        let inner = self.inner.clone();
        batch
            .clone()
            .then(move |r| async move {
                match r {
                    Ok(found) => found
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| Arc::new(anyhow!("no embedding returned for '{key}'"))),
                    Err(e) if retry_alone => {
                        debug!("Batch failed ({e:#}); fetching '{key}' alone");
                        inner.fetch_one(key).await
                    }
                    Err(e) => Err(e),
                }
            })
            .boxed()
            .shared()
    }

    fn release(&self, key: &str, fetch: &SharedFetch) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight.get(key).is_some_and(|f| f.ptr_eq(fetch)) {
                in_flight.remove(key);
            }
        }
    }

    /// Embeds every distinct key among `descriptors`. Keys that cannot be
    /// embedded this cycle are absent from the result; they never fail the call.
    pub async fn batch_get_embeddings(
        &self,
        descriptors: &[ProcessDescriptor],
    ) -> HashMap<String, Vec<f32>> {
        let mut seen = HashSet::new();
        let keys: Vec<String> = descriptors
            .iter()
            .map(|d| self.key_for(d))
            .filter(|k| seen.insert(k.clone()))
            .collect();
        self.batch_get_keys(keys).await
    }

    pub async fn batch_get_keys(&self, keys: Vec<String>) -> HashMap<String, Vec<f32>> {
        let mut out = HashMap::with_capacity(keys.len());

        let mut misses = Vec::new();
        for key in keys {
            match self.inner.in_memory(&key) {
                Some(v) => {
                    METRICS.record_embedding_lookup("memory");
                    out.insert(key, v);
                }
                None => misses.push(key),
            }
        }

        let mut uncached = Vec::new();
        for key in misses {
            match self.inner.from_cache(&key).await {
                Some(v) => {
                    out.insert(key, v);
                }
                None => uncached.push(key),
            }
        }

        // Claim keys nobody else is fetching; join the rest.
        let mut joined: Vec<(String, SharedFetch)> = Vec::new();
        let mut claimed_fetches: Vec<(String, SharedFetch)> = Vec::new();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            let mut claimed = Vec::new();
            for key in uncached {
                if let Some(v) = self.inner.in_memory(&key) {
                    out.insert(key, v);
                } else if let Some(f) = in_flight.get(&key) {
                    joined.push((key, f.clone()));
                } else {
                    claimed.push(key);
                }
            }
            for chunk in claimed.chunks(self.batch_size) {
                let batch: SharedBatch = self
                    .inner
                    .clone()
                    .fetch_batch(chunk.to_vec())
                    .boxed()
                    .shared();
                let retry_alone = chunk.len() > 1;
                for key in chunk {
                    let per_key = self.per_key_fetch(&batch, key.clone(), retry_alone);
                    in_flight.insert(key.clone(), per_key.clone());
                    claimed_fetches.push((key.clone(), per_key));
                }
            }
        }

        // Every caller of a claimed key, owner or joiner, awaits the same future.
        for (key, fetch) in claimed_fetches {
            let result = fetch.clone().await;
            self.release(&key, &fetch);
            match result {
                Ok(v) => {
                    out.insert(key, v);
                }
                Err(e) => warn!("Skipping unembeddable process text '{key}': {e:#}"),
            }
        }

        for (key, fetch) in joined {
            match fetch.await {
                Ok(v) => {
                    out.insert(key, v);
                }
                Err(e) => warn!("Skipping unembeddable process text '{key}': {e:#}"),
            }
        }

        out
    }
}

use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::{QueryHit, RetrievedChunk};
use crate::rerank::{keyword_score, query_terms};
use crate::traits::{QueryCache, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const QUERY_CACHE_PREFIX: &str = "query_chunks:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub collection: String,
    pub max_chunks: usize,
    pub similarity_threshold: f64,
    pub candidate_multiplier: usize,
    pub keyword_fallback_max_chunks: usize,
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection: "solar_docs".to_string(),
            max_chunks: 5,
            similarity_threshold: 0.7,
            candidate_multiplier: 2,
            keyword_fallback_max_chunks: 1000,
            cache_ttl_secs: 300,
        }
    }
}

pub fn cache_key(query: &str, collection: &str, max_chunks: usize, threshold: f64) -> String {
    format!("{QUERY_CACHE_PREFIX}{query}:{collection}:{max_chunks}:{threshold}")
}

pub fn normalize_distances(distances: &[f64]) -> Vec<f64> {
    let max_distance = distances.iter().copied().fold(0.0_f64, f64::max);

    if max_distance <= 0.0 || !max_distance.is_finite() {
        return vec![1.0; distances.len()];
    }

    distances
        .iter()
        .map(|distance| (1.0 - distance / max_distance).clamp(0.0, 1.0))
        .collect()
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    cache: Option<Arc<dyn QueryCache>>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        max_chunks: usize,
        similarity_threshold: f64,
    ) -> Vec<RetrievedChunk> {
        let started = Instant::now();
        let key = cache_key(query, collection, max_chunks, similarity_threshold);

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key).await {
                debug!(collection, chunks = cached.len(), "retrieval cache hit");
                return cached;
            }
        }

        match self
            .try_retrieve(query, collection, max_chunks, similarity_threshold)
            .await
        {
            Ok(chunks) => {
                if let Some(cache) = &self.cache {
                    if !chunks.is_empty() {
                        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
                        cache.set(&key, chunks.clone(), ttl).await;
                    }
                }
                info!(
                    collection,
                    chunks = chunks.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "retrieved chunks"
                );
                chunks
            }
            Err(error) => {
                warn!(collection, %error, "retrieval failed, returning no chunks");
                Vec::new()
            }
        }
    }

    pub async fn try_retrieve(
        &self,
        query: &str,
        collection: &str,
        max_chunks: usize,
        similarity_threshold: f64,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(RetrievalError::MissingQueryVector)?;

        let n_results = max_chunks.saturating_mul(self.config.candidate_multiplier.max(1));
        let hits = self.store.query(collection, &query_vector, n_results).await?;
        let mut chunks = primary_candidates(hits, similarity_threshold);

        if chunks.len() < max_chunks {
            debug!(
                collection,
                primary = chunks.len(),
                wanted = max_chunks,
                "not enough vector hits, trying keyword fallback"
            );

            let fallback = match self.keyword_fallback(query, collection, max_chunks).await {
                Ok(fallback) => fallback,
                Err(error) => {
                    warn!(collection, %error, "keyword fallback failed");
                    Vec::new()
                }
            };

            let mut seen: HashSet<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            for chunk in fallback {
                if seen.insert(chunk.text.clone()) {
                    chunks.push(chunk);
                }
            }
        }

        Ok(chunks)
    }

    pub async fn keyword_fallback(
        &self,
        query: &str,
        collection: &str,
        max_results: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let total = self.store.count(collection).await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        if total > self.config.keyword_fallback_max_chunks {
            warn!(
                collection,
                total,
                limit = self.config.keyword_fallback_max_chunks,
                "collection too large for keyword fallback"
            );
            return Ok(Vec::new());
        }

        let terms = query_terms(query);
        let mut scored: Vec<RetrievedChunk> = Vec::new();
        for record in self.store.get(collection, None).await? {
            let score = keyword_score(&terms, &record.text);
            if score > 0.0 {
                let rank = scored.len() + 1;
                scored.push(RetrievedChunk::from_record(record, score, rank));
            }
        }

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(max_results);
        Ok(scored)
    }
}

fn primary_candidates(hits: Vec<QueryHit>, similarity_threshold: f64) -> Vec<RetrievedChunk> {
    let distances: Vec<f64> = hits.iter().map(|hit| hit.distance).collect();
    let similarities = normalize_distances(&distances);

    hits.into_iter()
        .zip(similarities)
        .enumerate()
        .filter(|(_, (_, similarity))| *similarity >= similarity_threshold)
        .map(|(index, (hit, similarity))| RetrievedChunk::from_record(hit.record, similarity, index + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::error::{EmbeddingError, StoreError};
    use crate::models::{ChunkRecord, Metadata, MetadataFilter};
    use crate::stores::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEmbedder {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn add(&self, _: &str, _: &[ChunkRecord], _: &[Vec<f32>]) -> Result<(), StoreError> {
            Err(StoreError::Request("offline".to_string()))
        }

        async fn query(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<QueryHit>, StoreError> {
            Err(StoreError::Request("offline".to_string()))
        }

        async fn get(
            &self,
            _: &str,
            _: Option<&MetadataFilter>,
        ) -> Result<Vec<ChunkRecord>, StoreError> {
            Err(StoreError::Request("offline".to_string()))
        }

        async fn delete(&self, _: &str, _: &[String]) -> Result<(), StoreError> {
            Err(StoreError::Request("offline".to_string()))
        }

        async fn count(&self, _: &str) -> Result<usize, StoreError> {
            Err(StoreError::Request("offline".to_string()))
        }
    }

    fn record(id: usize, text: String) -> ChunkRecord {
        ChunkRecord {
            id: format!("chunk-{id}"),
            text,
            metadata: Metadata::new(),
        }
    }

    // 500 chunks: two sit on the query vector, ten mention "solar", the rest are far filler.
    async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let mut records = Vec::new();
        let mut embeddings = Vec::new();

        for id in 0..500 {
            let (text, embedding) = match id {
                0 | 1 => (format!("solar panel efficiency report {id}"), vec![0.0, 0.0]),
                10..=19 => (format!("solar inverter warranty terms {id}"), vec![10.0, 0.0]),
                _ => (format!("unrelated filler paragraph {id}"), vec![10.0, 0.0]),
            };
            records.push(record(id, text));
            embeddings.push(embedding);
        }

        store
            .add("solar_docs", &records, &embeddings)
            .await
            .expect("seed store");
        store
    }

    #[test]
    fn distances_normalize_into_unit_range() {
        let similarities = normalize_distances(&[0.5, 2.0, 1.0, 4.0]);
        assert!(similarities.iter().all(|value| (0.0..=1.0).contains(value)));
        assert!((similarities[0] - 0.875).abs() < 1e-12);
        assert_eq!(similarities[3], 0.0);
    }

    #[test]
    fn zero_distance_batch_scores_one() {
        assert_eq!(normalize_distances(&[0.0, 0.0]), vec![1.0, 1.0]);
        assert!(normalize_distances(&[]).is_empty());
    }

    #[test]
    fn cache_key_includes_every_parameter() {
        assert_eq!(
            cache_key("roof load", "solar_docs", 5, 0.7),
            "query_chunks:roof load:solar_docs:5:0.7"
        );
    }

    #[tokio::test]
    async fn keyword_fallback_fills_up_to_max_chunks() {
        let store = seeded_store().await;
        let embedder = Arc::new(FixedEmbedder::new(vec![0.0, 0.0]));
        let retriever = Retriever::new(embedder, store, RetrievalConfig::default());

        let chunks = retriever
            .try_retrieve("solar panel efficiency", "solar_docs", 5, 0.7)
            .await
            .expect("retrieval succeeds");

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].chunk_id, "chunk-0");
        assert_eq!(chunks[1].chunk_id, "chunk-1");
        assert!(chunks[..2].iter().all(|chunk| chunk.similarity == 1.0));
        for chunk in &chunks[2..] {
            assert!(chunk.text.starts_with("solar inverter warranty"));
            assert!((chunk.similarity - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn large_collections_skip_keyword_fallback() {
        let store = seeded_store().await;
        let embedder = Arc::new(FixedEmbedder::new(vec![0.0, 0.0]));
        let config = RetrievalConfig {
            keyword_fallback_max_chunks: 100,
            ..RetrievalConfig::default()
        };
        let retriever = Retriever::new(embedder, store, config);

        let chunks = retriever
            .retrieve("solar panel efficiency", "solar_docs", 5, 0.7)
            .await;
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn repeated_queries_are_served_from_cache() {
        let store = seeded_store().await;
        let embedder = Arc::new(FixedEmbedder::new(vec![0.0, 0.0]));
        let cache = Arc::new(TtlCache::new(16));
        let retriever = Retriever::new(embedder.clone(), store, RetrievalConfig::default())
            .with_cache(cache.clone());

        let first = retriever.retrieve("solar panel", "solar_docs", 5, 0.7).await;
        let second = retriever.retrieve("solar panel", "solar_docs", 5, 0.7).await;

        assert_eq!(first, second);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.invalidate_prefix(QUERY_CACHE_PREFIX).await, 1);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty() {
        let embedder = Arc::new(FixedEmbedder::new(vec![0.0, 0.0]));
        let retriever = Retriever::new(embedder, Arc::new(BrokenStore), RetrievalConfig::default());

        assert!(retriever.retrieve("battery", "solar_docs", 5, 0.7).await.is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let embedder = Arc::new(FixedEmbedder::new(vec![0.0]));
        let retriever = Retriever::new(embedder, Arc::new(InMemoryVectorStore::new()), RetrievalConfig::default());

        let result = retriever.try_retrieve("   ", "solar_docs", 5, 0.7).await;
        assert!(matches!(result, Err(RetrievalError::EmptyQuery)));
    }
}

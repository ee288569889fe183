use crate::error::StoreError;
use crate::models::{ChunkRecord, DocumentRecord, DocumentUpdate, MetadataFilter, QueryHit};
use crate::traits::{DocumentStore, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredChunk {
    record: ChunkRecord,
    embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let diff = f64::from(*a) - f64::from(*b);
            diff * diff
        })
        .sum()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if records.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                records.len()
            )));
        }

        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection.to_string()).or_default();

        if let Some(record) = records
            .iter()
            .find(|record| entries.iter().any(|stored| stored.record.id == record.id))
        {
            return Err(StoreError::Duplicate(record.id.clone()));
        }

        entries.extend(records.iter().zip(embeddings).map(|(record, embedding)| StoredChunk {
            record: record.clone(),
            embedding: embedding.clone(),
        }));
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        let collections = self.collections.read().await;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<QueryHit> = entries
            .iter()
            .map(|stored| QueryHit {
                record: stored.record.clone(),
                distance: squared_l2(&stored.embedding, embedding),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn get(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|stored| filter.map_or(true, |f| f.matches(&stored.record.metadata)))
                    .map(|stored| stored.record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(entries) = collections.get_mut(collection) {
            entries.retain(|stored| !ids.contains(&stored.record.id));
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    records: RwLock<HashMap<String, DocumentRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert_by_path(&self, record: DocumentRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.file_path.clone(), record);
        Ok(())
    }

    async fn update(&self, file_path: &str, update: DocumentUpdate) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        Ok(match records.get_mut(file_path) {
            Some(record) => {
                update.apply(record);
                true
            }
            None => false,
        })
    }

    async fn find_by_path(&self, file_path: &str) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self.records.read().await.get(file_path).cloned())
    }

    async fn find_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| record.document_id == document_id)
            .cloned())
    }

    async fn delete_by_id(&self, document_id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.document_id != document_id);
        Ok(records.len() != before)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut records: Vec<DocumentRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.ingestion_time.cmp(&b.ingestion_time));
        Ok(records)
    }
}

use crate::error::StoreError;
use crate::models::{ChunkRecord, DocumentRecord, DocumentUpdate, MetadataFilter, QueryHit, RetrievedChunk};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryHit>, StoreError>;

    async fn get(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkRecord>, StoreError>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_by_path(&self, record: DocumentRecord) -> Result<(), StoreError>;

    /// Returns `false` when no record exists for `file_path`.
    async fn update(&self, file_path: &str, update: DocumentUpdate) -> Result<bool, StoreError>;

    async fn find_by_path(&self, file_path: &str) -> Result<Option<DocumentRecord>, StoreError>;

    async fn find_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError>;

    async fn delete_by_id(&self, document_id: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError>;
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<RetrievedChunk>>;

    async fn set(&self, key: &str, value: Vec<RetrievedChunk>, ttl: Duration);

    async fn invalidate_prefix(&self, prefix: &str) -> usize;
}

use crate::error::StoreError;
use crate::models::{DocumentRecord, DocumentUpdate};
use crate::traits::DocumentStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug)]
pub struct JsonFileDocumentStore {
    path: PathBuf,
    records: Mutex<Vec<DocumentRecord>>,
}

impl JsonFileDocumentStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        info!(path = %path.display(), records = records.len(), "opened document store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &[DocumentRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!(path = %self.path.display(), records = records.len(), "persisted document store");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn upsert_by_path(&self, record: DocumentRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        match next.iter_mut().find(|existing| existing.file_path == record.file_path) {
            Some(existing) => *existing = record,
            None => next.push(record),
        }
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn update(&self, file_path: &str, update: DocumentUpdate) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let Some(record) = next.iter_mut().find(|record| record.file_path == file_path) else {
            return Ok(false);
        };
        update.apply(record);
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }

    async fn find_by_path(&self, file_path: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|record| record.file_path == file_path).cloned())
    }

    async fn find_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|record| record.document_id == document_id).cloned())
    }

    async fn delete_by_id(&self, document_id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let next: Vec<DocumentRecord> = records
            .iter()
            .filter(|record| record.document_id != document_id)
            .cloned()
            .collect();
        if next.len() == records.len() {
            return Ok(false);
        }
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub type Metadata = serde_json::Map<String, Value>;

pub const META_DOCUMENT_ID: &str = "document_id";
pub const META_SOURCE: &str = "source";
pub const META_PAGE: &str = "page";
pub const META_CHUNK_INDEX: &str = "chunk_index";
pub const META_MERGED: &str = "merged";
pub const META_PARENT_CHUNK_ID: &str = "parent_chunk_id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_extension: String,
    pub checksum: Option<String>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub metadata: Metadata,
    pub chunks_count: Option<usize>,
    pub ingestion_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub processing_time_secs: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub status: Option<DocumentStatus>,
    pub checksum: Option<String>,
    pub chunks_count: Option<usize>,
    pub completion_time: Option<DateTime<Utc>>,
    pub processing_time_secs: Option<f64>,
    pub error: Option<String>,
}

impl DocumentUpdate {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(DocumentStatus::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn checksum(checksum: String) -> Self {
        Self {
            checksum: Some(checksum),
            ..Self::default()
        }
    }

    pub fn completed(chunks_count: usize, processing_time_secs: f64) -> Self {
        Self {
            status: Some(DocumentStatus::Completed),
            checksum: None,
            chunks_count: Some(chunks_count),
            completion_time: Some(Utc::now()),
            processing_time_secs: Some(processing_time_secs),
            error: None,
        }
    }

    pub fn apply(self, record: &mut DocumentRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(checksum) = self.checksum {
            record.checksum = Some(checksum);
        }
        if let Some(count) = self.chunks_count {
            record.chunks_count = Some(count);
        }
        if let Some(time) = self.completion_time {
            record.completion_time = Some(time);
        }
        if let Some(secs) = self.processing_time_secs {
            record.processing_time_secs = Some(secs);
        }
        if let Some(error) = self.error {
            record.error = Some(error);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMap {
    offsets: BTreeMap<usize, u32>,
}

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offset: usize, page: u32) {
        self.offsets.insert(offset, page);
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Page recorded at `offset`, else the page whose recorded offset is nearest to it.
    /// Ties resolve to the lower offset.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        if let Some(page) = self.offsets.get(&offset) {
            return Some(*page);
        }

        let before = self.offsets.range(..offset).next_back();
        let after = self.offsets.range(offset..).next();

        match (before, after) {
            (Some((low, low_page)), Some((high, high_page))) => {
                if offset - low <= high - offset {
                    Some(*low_page)
                } else {
                    Some(*high_page)
                }
            }
            (Some((_, page)), None) | (None, Some((_, page))) => Some(*page),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub page_map: PageMap,
}

impl Extraction {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub text: String,
    pub merged: bool,
    pub parent_chunk_id: Option<String>,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn metadata(&self, extra: &Metadata) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_DOCUMENT_ID.to_string(), Value::from(self.document_id.clone()));
        metadata.insert(META_SOURCE.to_string(), Value::from(self.source_path.clone()));
        metadata.insert(
            META_PAGE.to_string(),
            self.page.map(Value::from).unwrap_or(Value::Null),
        );
        metadata.insert(META_CHUNK_INDEX.to_string(), Value::from(self.chunk_index));
        if self.merged {
            metadata.insert(META_MERGED.to_string(), Value::Bool(true));
        }
        if let Some(parent) = &self.parent_chunk_id {
            metadata.insert(META_PARENT_CHUNK_ID.to_string(), Value::from(parent.clone()));
        }

        for (key, value) in extra {
            metadata.insert(key.clone(), value.clone());
        }

        metadata
    }

    pub fn into_record(self, extra: &Metadata) -> ChunkRecord {
        let metadata = self.metadata(extra);
        ChunkRecord {
            id: self.chunk_id,
            text: self.text,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub record: ChunkRecord,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: Value,
}

impl MetadataFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn document(document_id: &str) -> Self {
        Self::equals(META_DOCUMENT_ID, document_id)
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.get(&self.key) == Some(&self.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub similarity: f64,
    pub rank: usize,
    pub rerank_score: Option<f64>,
}

impl RetrievedChunk {
    pub fn from_record(record: ChunkRecord, similarity: f64, rank: usize) -> Self {
        Self {
            chunk_id: record.id,
            text: record.text,
            metadata: record.metadata,
            similarity,
            rank,
            rerank_score: None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).and_then(Value::as_str)
    }

    pub fn document_id(&self) -> Option<&str> {
        self.metadata.get(META_DOCUMENT_ID).and_then(Value::as_str)
    }

    pub fn page(&self) -> Option<u32> {
        self.metadata
            .get(META_PAGE)
            .and_then(Value::as_u64)
            .and_then(|page| u32::try_from(page).ok())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Completed,
    Exists,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestResult {
    pub file_path: String,
    pub status: IngestStatus,
    pub document_id: Option<String>,
    pub chunks_count: Option<usize>,
    pub processing_time_secs: Option<f64>,
    pub error: Option<String>,
}

impl IngestResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, IngestStatus::Completed | IngestStatus::Exists)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub directory_path: PathBuf,
    pub files_processed: usize,
    pub successful: usize,
    pub errors: usize,
    pub processing_time_secs: f64,
    pub results: Vec<IngestResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteResult {
    pub document_id: String,
    pub status: DeleteStatus,
    pub chunks_deleted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Pending,
    Processing,
    Completed,
    Error,
    NotFound,
}

impl From<DocumentStatus> for LookupStatus {
    fn from(value: DocumentStatus) -> Self {
        match value {
            DocumentStatus::Pending => Self::Pending,
            DocumentStatus::Processing => Self::Processing,
            DocumentStatus::Completed => Self::Completed,
            DocumentStatus::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentStatusReport {
    pub document_id: String,
    pub status: LookupStatus,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub chunks_count: Option<usize>,
    pub ingestion_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DocumentStatusReport {
    pub fn not_found(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            status: LookupStatus::NotFound,
            file_path: None,
            file_name: None,
            chunks_count: None,
            ingestion_time: None,
            completion_time: None,
            error: None,
        }
    }

    pub fn lookup_failed(document_id: &str, error: String) -> Self {
        Self {
            status: LookupStatus::Error,
            error: Some(error),
            ..Self::not_found(document_id)
        }
    }
}

impl From<&DocumentRecord> for DocumentStatusReport {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            document_id: record.document_id.clone(),
            status: record.status.into(),
            file_path: Some(record.file_path.clone()),
            file_name: Some(record.file_name.clone()),
            chunks_count: record.chunks_count,
            ingestion_time: Some(record.ingestion_time),
            completion_time: record.completion_time,
            error: record.error.clone(),
        }
    }
}

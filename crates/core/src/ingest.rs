use crate::chunking::{build_chunks, ChunkSource, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::extractor::{file_extension, DocumentExtractor, DocumentKind};
use crate::models::{
    ChunkRecord, DeleteResult, DeleteStatus, DirectoryReport, DocumentRecord, DocumentStatus,
    DocumentStatusReport, DocumentUpdate, IngestResult, IngestStatus, Metadata, MetadataFilter,
    META_CHUNK_INDEX,
};
use crate::retrieval::QUERY_CACHE_PREFIX;
use crate::traits::{DocumentStore, QueryCache, VectorStore};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionConfig {
    pub collection: String,
    pub chunking: ChunkingConfig,
    pub extensions: Vec<String>,
    pub batch_pause: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            collection: "solar_docs".to_string(),
            chunking: ChunkingConfig::default(),
            extensions: vec!["pdf".to_string(), "txt".to_string(), "docx".to_string()],
            batch_pause: Duration::from_millis(100),
        }
    }
}

impl IngestionConfig {
    fn accepts(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
            && DocumentKind::from_extension(extension).is_some()
    }

    fn supported_list(&self) -> String {
        self.extensions
            .iter()
            .map(|extension| format!(".{}", extension.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn discover_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    extensions
                        .iter()
                        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
                })
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn elapsed_secs(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}

pub struct IngestionManager {
    extractor: DocumentExtractor,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    documents: Arc<dyn DocumentStore>,
    cache: Option<Arc<dyn QueryCache>>,
    config: IngestionConfig,
}

impl IngestionManager {
    pub fn new(
        extractor: DocumentExtractor,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        documents: Arc<dyn DocumentStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            extractor,
            embedder,
            vectors,
            documents,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// `Err` is returned only when the file is missing or its type is unsupported; no status
    /// record exists in that case. Every later failure is recorded on the document and reported
    /// as an `IngestStatus::Error` result.
    pub async fn ingest_document(
        &self,
        path: &Path,
        metadata: Metadata,
        force_reindex: bool,
    ) -> Result<IngestResult, IngestError> {
        let started = Instant::now();
        let file_path = path.to_string_lossy().to_string();

        if !path.is_file() {
            return Err(IngestError::FileNotFound(file_path));
        }

        let extension = file_extension(path);
        if !self.config.accepts(&extension) {
            return Err(IngestError::UnsupportedFileType {
                extension,
                supported: self.config.supported_list(),
            });
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| IngestError::MissingFileName(file_path.clone()))?;

        let previous = match self.documents.find_by_path(&file_path).await {
            Ok(previous) => previous,
            Err(store_error) => {
                let error = IngestError::from(store_error);
                error!(path = %file_path, %error, "document lookup failed");
                return Ok(failed_result(file_path, None, &error, started));
            }
        };

        if let Some(existing) = previous
            .as_ref()
            .filter(|record| record.status == DocumentStatus::Completed && !force_reindex)
        {
            info!(path = %file_path, document_id = %existing.document_id, "document already indexed");
            return Ok(IngestResult {
                file_path,
                status: IngestStatus::Exists,
                document_id: Some(existing.document_id.clone()),
                chunks_count: existing.chunks_count,
                processing_time_secs: Some(elapsed_secs(started)),
                error: None,
            });
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let record = DocumentRecord {
            document_id: document_id.clone(),
            file_path: file_path.clone(),
            file_name,
            file_extension: extension,
            checksum: None,
            status: DocumentStatus::Processing,
            metadata: metadata.clone(),
            chunks_count: None,
            ingestion_time: Utc::now(),
            completion_time: None,
            processing_time_secs: None,
            error: None,
        };

        let outcome = self.index_document(path, record, &metadata).await;

        // the path holds one generation of chunks; the old one goes whether or not the new landed
        let replaced = match previous.filter(|previous| previous.document_id != document_id) {
            Some(previous) => self.retire_generation(&file_path, &previous.document_id).await,
            None => false,
        };

        match outcome {
            Ok(chunks_count) => {
                let secs = elapsed_secs(started);
                if let Err(error) = self
                    .documents
                    .update(&file_path, DocumentUpdate::completed(chunks_count, secs))
                    .await
                {
                    warn!(path = %file_path, %error, "failed to mark document completed");
                }
                self.invalidate_cache().await;

                info!(
                    path = %file_path,
                    document_id = %document_id,
                    chunk_count = chunks_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "document ingested"
                );
                Ok(IngestResult {
                    file_path,
                    status: IngestStatus::Completed,
                    document_id: Some(document_id),
                    chunks_count: Some(chunks_count),
                    processing_time_secs: Some(secs),
                    error: None,
                })
            }
            Err(error) => {
                error!(path = %file_path, document_id = %document_id, %error, "document ingestion failed");
                if let Err(update_error) = self
                    .documents
                    .update(&file_path, DocumentUpdate::failed(error.to_string()))
                    .await
                {
                    warn!(path = %file_path, error = %update_error, "failed to record ingestion error");
                }
                if replaced {
                    self.invalidate_cache().await;
                }
                Ok(failed_result(file_path, Some(document_id), &error, started))
            }
        }
    }

    async fn index_document(
        &self,
        path: &Path,
        record: DocumentRecord,
        metadata: &Metadata,
    ) -> Result<usize, IngestError> {
        let document_id = record.document_id.clone();
        let file_path = record.file_path.clone();
        self.documents.upsert_by_path(record).await?;

        let owned = path.to_path_buf();
        let checksum = tokio::task::spawn_blocking(move || digest_file(&owned)).await??;
        self.documents
            .update(&file_path, DocumentUpdate::checksum(checksum))
            .await?;

        let extraction = self.extractor.extract(path).await?;
        let chunks = build_chunks(
            ChunkSource {
                document_id: &document_id,
                source_path: &file_path,
            },
            &extraction,
            &self.config.chunking,
        )?;

        if chunks.is_empty() {
            warn!(path = %file_path, "no chunks created from document");
            return Err(IngestError::NoTextExtracted);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            }
            .into());
        }

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .map(|chunk| chunk.into_record(metadata))
            .collect();
        self.vectors
            .add(&self.config.collection, &records, &embeddings)
            .await?;
        debug!(path = %file_path, chunk_count = records.len(), "indexed chunks");

        Ok(records.len())
    }

    async fn retire_generation(&self, file_path: &str, previous_id: &str) -> bool {
        match self.remove_chunks(previous_id).await {
            Ok(removed) => {
                debug!(path = %file_path, previous_document_id = %previous_id, removed, "removed replaced chunks");
                removed > 0
            }
            Err(error) => {
                warn!(
                    path = %file_path,
                    previous_document_id = %previous_id,
                    %error,
                    "failed to remove chunks of replaced document"
                );
                false
            }
        }
    }

    async fn remove_chunks(&self, document_id: &str) -> Result<usize, IngestError> {
        let filter = MetadataFilter::document(document_id);
        let ids: Vec<String> = self
            .vectors
            .get(&self.config.collection, Some(&filter))
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect();

        if ids.is_empty() {
            warn!(document_id, "no chunks found for document");
            return Ok(0);
        }

        self.vectors.delete(&self.config.collection, &ids).await?;
        Ok(ids.len())
    }

    async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            let removed = cache.invalidate_prefix(QUERY_CACHE_PREFIX).await;
            debug!(removed, "invalidated cached retrieval results");
        }
    }

    pub async fn ingest_directory(
        &self,
        directory: &Path,
        metadata: Metadata,
        force_reindex: bool,
    ) -> Result<DirectoryReport, IngestError> {
        let started = Instant::now();
        if !directory.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "directory not found: {}",
                directory.display()
            )));
        }

        let files = discover_files(directory, &self.config.extensions);
        if files.is_empty() {
            warn!(directory = %directory.display(), "no supported files found");
        }

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let mut file_metadata = metadata.clone();
            file_metadata.insert(
                "base_directory".to_string(),
                Value::from(directory.to_string_lossy().to_string()),
            );

            let result = match self.ingest_document(&file, file_metadata, force_reindex).await {
                Ok(result) => result,
                Err(error) => {
                    error!(path = %file.display(), %error, "file rejected");
                    failed_result(file.to_string_lossy().to_string(), None, &error, Instant::now())
                }
            };
            results.push(result);

            if !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        let successful = results.iter().filter(|result| result.is_success()).count();
        let report = DirectoryReport {
            directory_path: directory.to_path_buf(),
            files_processed: results.len(),
            successful,
            errors: results.len() - successful,
            processing_time_secs: elapsed_secs(started),
            results,
        };

        info!(
            directory = %directory.display(),
            files = report.files_processed,
            successful = report.successful,
            errors = report.errors,
            "directory ingestion finished"
        );
        Ok(report)
    }

    pub async fn delete_document(&self, document_id: &str) -> DeleteResult {
        let report_error = |error: IngestError| {
            error!(document_id, %error, "document deletion failed");
            DeleteResult {
                document_id: document_id.to_string(),
                status: DeleteStatus::Error,
                chunks_deleted: 0,
                error: Some(error.to_string()),
            }
        };

        match self.documents.find_by_id(document_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return DeleteResult {
                    document_id: document_id.to_string(),
                    status: DeleteStatus::NotFound,
                    chunks_deleted: 0,
                    error: None,
                }
            }
            Err(error) => return report_error(error.into()),
        }

        let chunks_deleted = match self.remove_chunks(document_id).await {
            Ok(count) => count,
            Err(error) => return report_error(error),
        };

        if let Err(error) = self.documents.delete_by_id(document_id).await {
            return report_error(error.into());
        }
        self.invalidate_cache().await;

        info!(document_id, chunks_deleted, "document deleted");
        DeleteResult {
            document_id: document_id.to_string(),
            status: DeleteStatus::Deleted,
            chunks_deleted,
            error: None,
        }
    }

    pub async fn get_document_status(&self, document_id: &str) -> DocumentStatusReport {
        match self.documents.find_by_id(document_id).await {
            Ok(Some(record)) => DocumentStatusReport::from(&record),
            Ok(None) => DocumentStatusReport::not_found(document_id),
            Err(error) => {
                warn!(document_id, %error, "document status lookup failed");
                DocumentStatusReport::lookup_failed(document_id, error.to_string())
            }
        }
    }

    pub async fn list_documents(&self) -> Vec<DocumentRecord> {
        self.documents.list().await.unwrap_or_else(|error| {
            warn!(%error, "listing documents failed");
            Vec::new()
        })
    }

    pub async fn get_document_chunks(&self, document_id: &str) -> Vec<ChunkRecord> {
        let filter = MetadataFilter::document(document_id);
        let mut chunks = match self
            .vectors
            .get(&self.config.collection, Some(&filter))
            .await
        {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(document_id, %error, "loading document chunks failed");
                return Vec::new();
            }
        };

        chunks.sort_by_key(|chunk| {
            chunk
                .metadata
                .get(META_CHUNK_INDEX)
                .and_then(Value::as_u64)
                .unwrap_or(u64::MAX)
        });
        chunks
    }
}

fn failed_result(
    file_path: String,
    document_id: Option<String>,
    error: &IngestError,
    started: Instant,
) -> IngestResult {
    IngestResult {
        file_path,
        status: IngestStatus::Error,
        document_id,
        chunks_count: None,
        processing_time_secs: Some(elapsed_secs(started)),
        error: Some(error.to_string()),
    }
}

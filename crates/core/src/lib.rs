pub mod cache;
pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod rerank;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use cache::TtlCache;
pub use chunking::{build_chunks, ChunkSource, ChunkingConfig};
pub use config::Settings;
pub use context::{build_context_prompt, format_citations, optimize_chunks, ContextConfig, SourceCitation};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, EmbeddingError, IngestError, RerankError, RetrievalError, StoreError};
pub use extractor::{DocumentExtractor, ExtractorConfig, PdfStrategy};
pub use ingest::{IngestionConfig, IngestionManager};
pub use models::{
    ChunkRecord, DeleteResult, DeleteStatus, DirectoryReport, DocumentRecord, DocumentStatus,
    DocumentStatusReport, IngestResult, IngestStatus, Metadata, RetrievedChunk,
};
pub use orchestrator::{PreparedContext, RagPipeline};
pub use query::{preprocess_query, tune_retrieval_params, Expertise, UserContext};
pub use rerank::{RerankConfig, Reranker};
pub use retrieval::{RetrievalConfig, Retriever};
pub use stores::{ChromaStore, InMemoryDocumentStore, InMemoryVectorStore, JsonFileDocumentStore};
pub use traits::{DocumentStore, QueryCache, VectorStore};

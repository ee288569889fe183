use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::chunking::ChunkingConfig;
use crate::context::ContextConfig;
use crate::embeddings::{OllamaEmbedderConfig, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::ConfigError;
use crate::extractor::{ExtractorConfig, OcrEndpointConfig, PdfStrategy};
use crate::ingest::IngestionConfig;
use crate::rerank::RerankConfig;
use crate::retrieval::RetrievalConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "SOLAR_RAG_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "solar-rag.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub context: ContextConfig,
    pub ingestion: IngestionSettings,
    pub embedding: EmbeddingSettings,
    pub stores: StoreSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub extensions: Vec<String>,
    pub pdf_strategies: Vec<PdfStrategy>,
    pub batch_pause_ms: u64,
    pub pdftotext_binary: String,
    pub ocr_endpoint: Option<String>,
    pub ocr_api_key: Option<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            extensions: vec!["pdf".to_string(), "txt".to_string(), "docx".to_string()],
            pdf_strategies: PdfStrategy::DEFAULT_ORDER.to_vec(),
            batch_pause_ms: 100,
            pdftotext_binary: "pdftotext".to_string(),
            ocr_endpoint: None,
            ocr_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ngram,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub url: String,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ngram,
            url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub chroma_url: String,
    pub documents_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            chroma_url: "http://localhost:8000".to_string(),
            documents_path: PathBuf::from("./data/documents.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Loads settings with priority: env vars > TOML > defaults.
    ///
    /// The file is `explicit` when given, else `$SOLAR_RAG_CONFIG`, else `./solar-rag.toml`
    /// when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = if let Some(path) = explicit {
            Self::from_file(path)?
        } else if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            Self::from_file(path)?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(DEFAULT_CONFIG_FILE)?
        } else {
            Self::default()
        };

        settings.merge_env();
        settings.validate()?;
        debug!(
            collection = %settings.retrieval.collection,
            embedding = ?settings.embedding.provider,
            "loaded settings"
        );
        Ok(settings)
    }

    pub fn merge_env(&mut self) {
        self.merge_overrides(|key| env::var(key).ok());
    }

    pub fn merge_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|value| value.trim().parse().ok())
        }

        if let Some(size) = parsed(lookup("SOLAR_RAG_CHUNK_SIZE")) {
            self.chunking.chunk_size = size;
        }
        if let Some(overlap) = parsed(lookup("SOLAR_RAG_CHUNK_OVERLAP")) {
            self.chunking.chunk_overlap = overlap;
        }
        if let Some(collection) = lookup("SOLAR_RAG_COLLECTION") {
            self.retrieval.collection = collection;
        }
        if let Some(max_chunks) = parsed(lookup("SOLAR_RAG_MAX_CHUNKS")) {
            self.retrieval.max_chunks = max_chunks;
        }
        if let Some(threshold) = parsed(lookup("SOLAR_RAG_SIMILARITY_THRESHOLD")) {
            self.retrieval.similarity_threshold = threshold;
        }
        if let Some(url) = lookup("SOLAR_RAG_CHROMA_URL") {
            self.stores.chroma_url = url;
        }
        if let Some(path) = lookup("SOLAR_RAG_DOCUMENTS_PATH") {
            self.stores.documents_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("SOLAR_RAG_EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(model) = lookup("SOLAR_RAG_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(endpoint) = lookup("LLM_OCR_ENDPOINT").filter(|value| !value.trim().is_empty()) {
            self.ingestion.ocr_endpoint = Some(endpoint);
        }
        if let Some(key) = lookup("LLM_OCR_API_KEY").filter(|value| !value.trim().is_empty()) {
            self.ingestion.ocr_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        if self.retrieval.max_chunks == 0 {
            return Err(invalid("retrieval.max_chunks must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(invalid("retrieval.similarity_threshold must be within [0, 1]"));
        }
        if self.retrieval.collection.trim().is_empty() {
            return Err(invalid("retrieval.collection must not be empty"));
        }

        let weights = [
            self.rerank.similarity_weight,
            self.rerank.keyword_weight,
            self.rerank.length_weight,
        ];
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
            return Err(invalid("rerank weights must be non-negative"));
        }
        if self.rerank.length_peak_chars == 0
            || self.rerank.length_zero_chars <= self.rerank.length_peak_chars
        {
            return Err(invalid(
                "rerank.length_zero_chars must exceed a non-zero length_peak_chars",
            ));
        }

        if self.ingestion.pdf_strategies.is_empty() {
            return Err(invalid("ingestion.pdf_strategies must name at least one strategy"));
        }
        if self.ingestion.extensions.is_empty() {
            return Err(invalid("ingestion.extensions must not be empty"));
        }
        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions must be non-zero"));
        }

        Ok(())
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            pdf_strategies: self.ingestion.pdf_strategies.clone(),
            pdftotext_binary: self.ingestion.pdftotext_binary.clone(),
            ocr: self.ingestion.ocr_endpoint.clone().map(|endpoint| OcrEndpointConfig {
                endpoint,
                api_key: self.ingestion.ocr_api_key.clone(),
            }),
        }
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            collection: self.retrieval.collection.clone(),
            chunking: self.chunking,
            extensions: self.ingestion.extensions.clone(),
            batch_pause: Duration::from_millis(self.ingestion.batch_pause_ms),
        }
    }

    pub fn ollama_config(&self) -> OllamaEmbedderConfig {
        OllamaEmbedderConfig {
            url: self.embedding.url.clone(),
            model: self.embedding.model.clone(),
            dimensions: self.embedding.dimensions,
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.chunking.chunk_size, 1000);
        assert_eq!(settings.chunking.chunk_overlap, 200);
        assert_eq!(settings.retrieval.collection, "solar_docs");
        assert_eq!(settings.retrieval.max_chunks, 5);
        assert_eq!(settings.retrieval.cache_ttl_secs, 300);
        assert_eq!(settings.rerank.length_peak_chars, 1000);
        assert_eq!(settings.context.merge_below_chars, 300);
        assert_eq!(settings.ingestion.pdf_strategies.len(), 4);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("solar-rag.toml");
        std::fs::write(
            &path,
            r#"
[chunking]
chunk_size = 800

[retrieval]
collection = "manuals"

[ingestion]
pdf_strategies = ["pdftotext", "lopdf"]

[embedding]
provider = "ollama"
"#,
        )?;

        let settings = Settings::load(Some(path.as_path()))?;
        assert_eq!(settings.chunking.chunk_size, 800);
        assert_eq!(settings.chunking.chunk_overlap, 200);
        assert_eq!(settings.retrieval.collection, "manuals");
        assert_eq!(settings.retrieval.similarity_threshold, 0.7);
        assert_eq!(
            settings.ingestion.pdf_strategies,
            vec![PdfStrategy::Pdftotext, PdfStrategy::Lopdf]
        );
        assert_eq!(settings.embedding.provider, EmbeddingProvider::Ollama);
        Ok(())
    }

    #[test]
    fn overrides_take_priority() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SOLAR_RAG_CHUNK_SIZE", "1500"),
            ("SOLAR_RAG_MAX_CHUNKS", "not-a-number"),
            ("SOLAR_RAG_SIMILARITY_THRESHOLD", "0.55"),
            ("LLM_OCR_ENDPOINT", "http://ocr.local/extract"),
            ("LLM_OCR_API_KEY", ""),
        ]);

        let mut settings = Settings::default();
        settings.merge_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(settings.chunking.chunk_size, 1500);
        assert_eq!(settings.retrieval.max_chunks, 5);
        assert_eq!(settings.retrieval.similarity_threshold, 0.55);

        let extractor = settings.extractor_config();
        let ocr = extractor.ocr.expect("ocr configured");
        assert_eq!(ocr.endpoint, "http://ocr.local/extract");
        assert_eq!(ocr.api_key, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = Settings::default();
        settings.chunking.chunk_overlap = 1000;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = Settings::default();
        settings.retrieval.similarity_threshold = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rerank.length_zero_chars = 500;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ingestion.pdf_strategies.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn unknown_strategy_fails_to_parse() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[ingestion]\npdf_strategies = [\"magic\"]\n")?;

        assert!(matches!(Settings::from_file(&path), Err(ConfigError::Parse(_))));
        Ok(())
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = Settings::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}

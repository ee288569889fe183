use crate::error::IngestError;
use crate::models::{Extraction, PageMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use quick_xml::events::Event;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FORM_FEED: char = '\u{000c}';
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PdfStrategy {
    Lopdf,
    PdfExtract,
    Pdftotext,
    LlmOcr,
}

impl PdfStrategy {
    pub const DEFAULT_ORDER: [PdfStrategy; 4] = [
        PdfStrategy::Lopdf,
        PdfStrategy::PdfExtract,
        PdfStrategy::Pdftotext,
        PdfStrategy::LlmOcr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lopdf => "lopdf",
            Self::PdfExtract => "pdf-extract",
            Self::Pdftotext => "pdftotext",
            Self::LlmOcr => "llm-ocr",
        }
    }

    fn is_available(self, config: &ExtractorConfig) -> bool {
        match self {
            Self::LlmOcr => config.ocr.is_some(),
            _ => true,
        }
    }

    fn extract_pages(self, path: &Path, config: &ExtractorConfig) -> Result<Vec<PageText>, IngestError> {
        match self {
            Self::Lopdf => LopdfExtractor.extract_pages(path),
            Self::PdfExtract => PdfExtractExtractor.extract_pages(path),
            Self::Pdftotext => PdftotextExtractor {
                binary: &config.pdftotext_binary,
            }
            .extract_pages(path),
            Self::LlmOcr => match &config.ocr {
                Some(ocr) => LlmOcrExtractor { config: ocr }.extract_pages(path),
                None => Ok(Vec::new()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
    Docx,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub pdf_strategies: Vec<PdfStrategy>,
    pub pdftotext_binary: String,
    pub ocr: Option<OcrEndpointConfig>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            pdf_strategies: PdfStrategy::DEFAULT_ORDER.to_vec(),
            pdftotext_binary: "pdftotext".to_string(),
            ocr: None,
        }
    }
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        document
            .get_pages()
            .into_keys()
            .map(|number| {
                document
                    .extract_text(&[number])
                    .map(|text| PageText { number, text })
                    .map_err(|error| IngestError::PdfParse(error.to_string()))
            })
            .collect()
    }
}

struct PdfExtractExtractor;

impl PdfExtractor for PdfExtractExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let bytes = std::fs::read(path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        Ok(split_form_feed_pages(&text))
    }
}

struct PdftotextExtractor<'a> {
    binary: &'a str,
}

impl PdfExtractor for PdftotextExtractor<'_> {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let output = Command::new(self.binary)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .output()
            .map_err(|error| {
                IngestError::PdfParse(format!("failed to run {}: {error}", self.binary))
            })?;

        if !output.status.success() {
            return Err(IngestError::PdfParse(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(split_form_feed_pages(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn split_form_feed_pages(text: &str) -> Vec<PageText> {
    text.split(FORM_FEED)
        .enumerate()
        .map(|(index, page)| PageText {
            number: (index + 1) as u32,
            text: page.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

struct LlmOcrExtractor<'a> {
    config: &'a OcrEndpointConfig,
}

impl PdfExtractor for LlmOcrExtractor<'_> {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let pdf = std::fs::read(path)?;
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = Client::new()
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        ocr_payload_to_pages(payload)
    }
}

fn ocr_payload_to_pages(payload: LlmOcrResponse) -> Result<Vec<PageText>, IngestError> {
    let listed = payload
        .pages
        .unwrap_or_default()
        .into_iter()
        .filter_map(|page| {
            let text = page.text?.trim().to_string();
            (!text.is_empty()).then(|| PageText {
                number: page.page.unwrap_or(1),
                text,
            })
        })
        .collect::<Vec<_>>();

    if !listed.is_empty() {
        return Ok(listed);
    }

    let paged = payload
        .text
        .map(|raw| {
            split_form_feed_pages(&raw)
                .into_iter()
                .map(|page| PageText {
                    number: page.number,
                    text: page.text.trim().to_string(),
                })
                .filter(|page| !page.text.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if paged.is_empty() {
        return Err(IngestError::OcrFailed("response contained no text".to_string()));
    }

    Ok(paged)
}

pub fn assemble_pages(pages: &[PageText]) -> Extraction {
    let mut text = String::new();
    let mut page_map = PageMap::new();
    let mut offset = 0usize;

    for page in pages {
        page_map.insert(offset, page.number);

        if page.text.is_empty() {
            continue;
        }

        text.push_str(&page.text);
        offset += page.text.chars().count();

        if !page.text.ends_with('\n') {
            text.push('\n');
            offset += 1;
        }
    }

    Extraction { text, page_map }
}

// lopdf and pdf-extract both panic on some malformed inputs
fn guarded(
    strategy: PdfStrategy,
    extract: impl FnOnce() -> Result<Vec<PageText>, IngestError>,
) -> Result<Vec<PageText>, IngestError> {
    std::panic::catch_unwind(AssertUnwindSafe(extract))
        .unwrap_or_else(|_| Err(IngestError::PdfParse(format!("{} panicked", strategy.name()))))
}

pub fn extract_pdf(path: &Path, config: &ExtractorConfig) -> Extraction {
    for strategy in config
        .pdf_strategies
        .iter()
        .copied()
        .filter(|strategy| strategy.is_available(config))
    {
        match guarded(strategy, || strategy.extract_pages(path, config)) {
            Ok(pages) => {
                let extraction = assemble_pages(&pages);
                if !extraction.is_empty() {
                    info!(
                        path = %path.display(),
                        strategy = strategy.name(),
                        pages = extraction.page_map.len(),
                        "extracted pdf text"
                    );
                    return extraction;
                }
                warn!(path = %path.display(), strategy = strategy.name(), "no text extracted, trying next strategy");
            }
            Err(error) => {
                warn!(path = %path.display(), strategy = strategy.name(), %error, "pdf strategy failed");
            }
        }
    }

    warn!(path = %path.display(), "every pdf strategy failed");
    Extraction::empty()
}

pub fn extract_plain_text(path: &Path) -> Result<Extraction, IngestError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes)
        .unwrap_or_else(|error| String::from_utf8_lossy(error.as_bytes()).into_owned());

    Ok(Extraction {
        text,
        page_map: PageMap::new(),
    })
}

pub fn extract_docx(path: &Path) -> Result<Extraction, IngestError> {
    let bytes = std::fs::read(path)?;
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| IngestError::Docx(error.to_string()))?;

    let mut xml = Vec::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| IngestError::Docx(error.to_string()))?
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)?;

    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(IngestError::Docx("word/document.xml exceeds size limit".to_string()));
    }

    Ok(Extraction {
        text: docx_paragraphs(&xml)?.join("\n\n"),
        page_map: PageMap::new(),
    })
}

fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"p" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" => push_to(&mut current, "\t"),
                b"br" | b"cr" => push_to(&mut current, "\n"),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::Docx(error.to_string()))?;
                push_to(&mut current, &unescaped);
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(paragraph) = current.take() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(IngestError::Docx(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

fn push_to(current: &mut Option<String>, text: &str) {
    if let Some(paragraph) = current.as_mut() {
        paragraph.push_str(text);
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentExtractor {
    config: Arc<ExtractorConfig>,
}

impl DocumentExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub async fn extract(&self, path: &Path) -> Result<Extraction, IngestError> {
        let extension = file_extension(path);
        let kind = DocumentKind::from_extension(&extension).ok_or_else(|| {
            IngestError::UnsupportedFileType {
                extension: extension.clone(),
                supported: ".pdf, .txt, .docx".to_string(),
            }
        })?;

        let owned: PathBuf = path.to_path_buf();
        let config = Arc::clone(&self.config);
        let task = tokio::task::spawn_blocking(move || extract_blocking(kind, &owned, &config));

        match task.await {
            Ok(extraction) => Ok(extraction),
            Err(error) => {
                warn!(path = %path.display(), %error, "extraction task failed");
                Ok(Extraction::empty())
            }
        }
    }
}

fn extract_blocking(kind: DocumentKind, path: &Path, config: &ExtractorConfig) -> Extraction {
    debug!(path = %path.display(), ?kind, "extracting text");

    let result = match kind {
        DocumentKind::Pdf => Ok(extract_pdf(path, config)),
        DocumentKind::Text => extract_plain_text(path),
        DocumentKind::Docx => extract_docx(path),
    };

    result.unwrap_or_else(|error| {
        warn!(path = %path.display(), %error, "text extraction failed");
        Extraction::empty()
    })
}

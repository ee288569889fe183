use crate::models::RetrievedChunk;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

const CONTEXT_HEADER: &str =
    "I've retrieved the following information that might help answer the query:\n\n";

const ANSWER_INSTRUCTIONS: &str = "Based on the above information and your knowledge, please \
provide a detailed and accurate response to the user's query. If the information doesn't fully \
answer the query, be honest about limitations. Include specific details from the retrieved \
information where relevant.\n\nWhen referring to specific information from the chunks, use \
'According to the provided information' or similar phrases. For contradictions between chunks, \
acknowledge these differences.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub signature_words: usize,
    pub merge_below_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            signature_words: 50,
            merge_below_chars: 300,
        }
    }
}

fn signature(text: &str, words: usize) -> String {
    text.to_lowercase()
        .split_whitespace()
        .take(words)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn optimize_chunks(chunks: Vec<RetrievedChunk>, config: &ContextConfig) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    let mut unique: Vec<RetrievedChunk> = chunks
        .into_iter()
        .filter(|chunk| seen.insert(signature(&chunk.text, config.signature_words)))
        .collect();

    unique.sort_by_key(|chunk| chunk.rank);

    let mut merged: Vec<RetrievedChunk> = Vec::with_capacity(unique.len());
    for chunk in unique {
        match merged.last_mut() {
            Some(current)
                if current.text.chars().count() < config.merge_below_chars
                    && current.source() == chunk.source() =>
            {
                current.text.push_str("\n\n");
                current.text.push_str(&chunk.text);
                current.similarity = current.similarity.max(chunk.similarity);
            }
            _ => merged.push(chunk),
        }
    }

    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub source: String,
    pub page: Option<Value>,
    pub similarity: f64,
}

impl SourceCitation {
    fn from_chunk(chunk: &RetrievedChunk) -> Self {
        Self {
            source: chunk.source().unwrap_or("Unknown").to_string(),
            page: chunk
                .metadata
                .get(crate::models::META_PAGE)
                .filter(|page| !page.is_null())
                .cloned(),
            similarity: chunk.similarity,
        }
    }

    pub fn display_name(&self) -> String {
        if self.source == "Unknown" {
            return self.source.clone();
        }
        Path::new(&self.source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPrompt {
    pub system: String,
    pub query: String,
    pub sources: Vec<SourceCitation>,
}

pub fn build_context_prompt(query: &str, chunks: &[RetrievedChunk]) -> ContextPrompt {
    let mut system = String::from(CONTEXT_HEADER);
    for (index, chunk) in chunks.iter().enumerate() {
        system.push_str(&format!("[CHUNK {}]:\n{}\n\n", index + 1, chunk.text));
    }
    system.push_str(ANSWER_INSTRUCTIONS);

    let mut sources: Vec<SourceCitation> = Vec::new();
    for chunk in chunks {
        let citation = SourceCitation::from_chunk(chunk);
        if !sources.contains(&citation) {
            sources.push(citation);
        }
    }

    ContextPrompt {
        system,
        query: query.to_string(),
        sources,
    }
}

pub fn format_citations(sources: &[SourceCitation]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut footer = String::from("\n\n**Sources:**\n");
    for (index, source) in sources.iter().enumerate() {
        let page = match &source.page {
            Some(Value::String(page)) => format!(" (page {page})"),
            Some(page) => format!(" (page {page})"),
            None => String::new(),
        };
        footer.push_str(&format!("{}. {}{}\n", index + 1, source.display_name(), page));
    }
    footer
}

use crate::error::IngestError;
use crate::models::{Chunk, Extraction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PARAGRAPH_BREAK: &[char] = &['\n', '\n'];
const SENTENCE_BREAKS: [&[char]; 6] = [
    &['.', ' '],
    &['.', '\n'],
    &['!', ' '],
    &['!', '\n'],
    &['?', ' '],
    &['?', '\n'],
];
const WORD_BREAK: &[char] = &[' '];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    pub max_chunk_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            min_chunk_chars: 100,
            max_chunk_ratio: 1.5,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be non-zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be less than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !self.max_chunk_ratio.is_finite() || self.max_chunk_ratio < 1.0 {
            return Err(IngestError::InvalidChunkConfig(format!(
                "max_chunk_ratio {} must be at least 1.0",
                self.max_chunk_ratio
            )));
        }
        Ok(())
    }

    pub fn max_chunk_chars(&self) -> f64 {
        self.chunk_size as f64 * self.max_chunk_ratio
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkSource<'a> {
    pub document_id: &'a str,
    pub source_path: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub offset: usize,
    pub text: String,
}

impl TextSpan {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

pub fn split_text_into_chunks(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<TextSpan> {
    let chars: Vec<char> = text.chars().collect();

    if chars.len() <= chunk_size {
        return vec![TextSpan {
            offset: 0,
            text: text.to_string(),
        }];
    }

    let mut spans = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = start + chunk_size;

        if end >= chars.len() {
            spans.push(span_of(&chars, start, chars.len()));
            break;
        }

        let end = find_breakpoint(&chars, start, end, chunk_size / 2).unwrap_or(end);
        spans.push(span_of(&chars, start, end));

        // overlap must never move the window backwards
        let next = end.saturating_sub(chunk_overlap);
        start = if next > start { next } else { end };
    }

    spans
}

fn span_of(chars: &[char], start: usize, end: usize) -> TextSpan {
    TextSpan {
        offset: start,
        text: chars[start..end].iter().collect(),
    }
}

fn find_breakpoint(chars: &[char], start: usize, end: usize, half: usize) -> Option<usize> {
    let floor = start + half;

    if let Some(position) = rfind(chars, PARAGRAPH_BREAK, start, end).filter(|p| *p > floor) {
        return Some(position + PARAGRAPH_BREAK.len());
    }

    let sentence = SENTENCE_BREAKS
        .iter()
        .filter_map(|pattern| rfind(chars, pattern, start, end))
        .max();
    if let Some(position) = sentence.filter(|p| *p > floor) {
        return Some(position + 2);
    }

    rfind(chars, WORD_BREAK, start, end)
        .filter(|p| *p > floor)
        .map(|position| position + WORD_BREAK.len())
}

fn rfind(chars: &[char], pattern: &[char], start: usize, end: usize) -> Option<usize> {
    let end = end.min(chars.len());
    if pattern.is_empty() || end < start + pattern.len() {
        return None;
    }

    (start..=end - pattern.len())
        .rev()
        .find(|&index| chars[index..index + pattern.len()] == *pattern)
}

pub fn build_chunks(
    source: ChunkSource<'_>,
    extraction: &Extraction,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let primary = split_text_into_chunks(&extraction.text, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .enumerate()
        .filter(|(_, span)| !span.text.trim().is_empty())
        .map(|(index, span)| Chunk {
            chunk_id: new_chunk_id(),
            document_id: source.document_id.to_string(),
            source_path: source.source_path.to_string(),
            chunk_index: index,
            page: extraction.page_map.page_at(span.offset),
            text: span.text,
            merged: false,
            parent_chunk_id: None,
        })
        .collect::<Vec<_>>();

    let merged = merge_short_chunks(primary, config.min_chunk_chars);
    Ok(split_oversized_chunks(merged, config))
}

fn merge_short_chunks(chunks: Vec<Chunk>, min_chars: usize) -> Vec<Chunk> {
    let mut merged = Vec::with_capacity(chunks.len());
    let mut remaining = chunks.into_iter().peekable();

    while let Some(mut chunk) = remaining.next() {
        if chunk.char_len() < min_chars {
            if let Some(next) = remaining.next_if(|next| next.page == chunk.page) {
                chunk.text.push(' ');
                chunk.text.push_str(&next.text);
                chunk.merged = true;
            }
        }
        merged.push(chunk);
    }

    merged
}

fn split_oversized_chunks(chunks: Vec<Chunk>, config: &ChunkingConfig) -> Vec<Chunk> {
    let ceiling = config.max_chunk_chars();
    let mut result: Vec<Chunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk.char_len() as f64 <= ceiling {
            result.push(chunk);
            continue;
        }

        for piece in repack(&chunk.text, config.chunk_size, ceiling) {
            let chunk_index = result.len();
            result.push(Chunk {
                chunk_id: new_chunk_id(),
                document_id: chunk.document_id.clone(),
                source_path: chunk.source_path.clone(),
                chunk_index,
                page: chunk.page,
                text: piece,
                merged: false,
                parent_chunk_id: Some(chunk.chunk_id.clone()),
            });
        }
    }

    result
}

fn repack(text: &str, chunk_size: usize, ceiling: f64) -> Vec<String> {
    let paragraphs = text.split("\n\n").collect::<Vec<_>>();

    let packed = if paragraphs.len() > 1 {
        greedy_pack(&paragraphs, "\n\n", chunk_size)
    } else {
        let sentence_lines = text.replace(". ", ".\n");
        let sentences = sentence_lines.split('\n').collect::<Vec<_>>();
        greedy_pack(&sentences, " ", chunk_size)
    };

    packed
        .into_iter()
        .flat_map(|piece| {
            if piece.chars().count() as f64 <= ceiling {
                vec![piece]
            } else {
                split_text_into_chunks(&piece, chunk_size, 0)
                    .into_iter()
                    .map(|span| span.text)
                    .collect()
            }
        })
        .collect()
}

fn greedy_pack(parts: &[&str], joiner: &str, chunk_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for part in parts {
        if current.chars().count() + part.chars().count() < chunk_size {
            if !current.is_empty() {
                current.push_str(joiner);
            }
            current.push_str(part);
        } else {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            current = (*part).to_string();
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn new_chunk_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageMap;

    const SOURCE: ChunkSource<'static> = ChunkSource {
        document_id: "doc-1",
        source_path: "/data/solar.txt",
    };

    fn words_text(len: usize) -> String {
        let words = ["solar", "panel", "array", "inverter", "string"];
        let mut text = String::new();
        let mut index = 0;
        while text.len() < len {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(words[index % words.len()]);
            index += 1;
        }
        text.truncate(len);
        text
    }

    fn extraction(text: &str) -> Extraction {
        Extraction {
            text: text.to_string(),
            page_map: PageMap::new(),
        }
    }

    fn chunk(id: &str, index: usize, page: Option<u32>, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "doc-1".to_string(),
            source_path: "/data/solar.txt".to_string(),
            chunk_index: index,
            page,
            text: text.to_string(),
            merged: false,
            parent_chunk_id: None,
        }
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let text = "Net metering credits surplus generation against grid consumption.";
        let chunks = build_chunks(SOURCE, &extraction(text), &ChunkingConfig::default()).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page, None);
        assert!(!chunks[0].merged);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = build_chunks(SOURCE, &extraction(""), &ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());

        let chunks = build_chunks(SOURCE, &extraction("  \n\n "), &ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn unbroken_text_falls_back_to_word_boundaries_with_overlap() {
        let text = words_text(2_500);
        assert!(!text.contains(". ") && !text.contains("\n"));

        let spans = split_text_into_chunks(&text, 1_000, 200);
        assert_eq!(spans.len(), 3);

        for span in &spans {
            assert!(span.char_len() <= 1_000);
        }
        for pair in spans.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            assert!(first.text.ends_with(' '));
            assert_eq!(second.offset, first.offset + first.char_len() - 200);
            let tail: String = first.text.chars().skip(first.char_len() - 200).collect();
            assert!(second.text.starts_with(&tail));
        }

        let chunks = build_chunks(SOURCE, &extraction(&text), &ChunkingConfig::default()).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.char_len() <= 1_000));
    }

    #[test]
    fn paragraph_break_past_midpoint_wins() {
        let first = "a".repeat(700);
        let text = format!("{first}. more text here\n\n{}", "b".repeat(600));
        let spans = split_text_into_chunks(&text, 1_000, 100);

        assert!(spans[0].text.ends_with("\n\n"));
        assert_eq!(spans[0].char_len(), 718);
    }

    #[test]
    fn breakpoint_before_midpoint_is_ignored() {
        let text = format!("{}\n\n{}. {}", "a".repeat(200), "b".repeat(500), "c".repeat(700));
        let spans = split_text_into_chunks(&text, 1_000, 0);

        // paragraph break at 200 is below the midpoint, sentence end at 702 is past it
        assert_eq!(spans[0].char_len(), 704);
        assert!(spans[0].text.ends_with(". "));
        assert_eq!(spans[1].offset, 704);
    }

    #[test]
    fn no_boundary_cuts_exactly_at_chunk_size() {
        let text = "x".repeat(2_300);
        let spans = split_text_into_chunks(&text, 1_000, 200);

        assert_eq!(spans[0].char_len(), 1_000);
        assert_eq!(spans[1].offset, 800);
        assert_eq!(spans.last().map(|span| span.offset + span.char_len()), Some(2_300));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let text = "é".repeat(1_500);
        let spans = split_text_into_chunks(&text, 1_000, 100);
        assert_eq!(spans[0].char_len(), 1_000);
        assert_eq!(spans[1].offset, 900);
    }

    #[test]
    fn pages_are_attributed_from_nearest_offset() {
        let page_one = words_text(900);
        let page_two = words_text(900);
        let text = format!("{page_one}\n\n{page_two}");
        let mut page_map = PageMap::new();
        page_map.insert(0, 1);
        page_map.insert(page_one.chars().count() + 2, 2);

        let config = ChunkingConfig {
            chunk_size: 600,
            chunk_overlap: 50,
            ..ChunkingConfig::default()
        };
        let spans = split_text_into_chunks(&text, config.chunk_size, config.chunk_overlap);
        let chunks = build_chunks(
            SOURCE,
            &Extraction {
                text: text.clone(),
                page_map: page_map.clone(),
            },
            &config,
        )
        .unwrap();

        assert_eq!(chunks.len(), spans.len());
        for (chunk, span) in chunks.iter().zip(spans.iter()) {
            assert_eq!(chunk.page, page_map.page_at(span.offset));
        }
        assert_eq!(chunks.first().and_then(|chunk| chunk.page), Some(1));
        assert_eq!(chunks.last().and_then(|chunk| chunk.page), Some(2));
    }

    #[test]
    fn short_chunks_merge_with_successor_on_same_page() {
        let chunks = vec![
            chunk("a", 0, Some(1), "Tilt angle."),
            chunk("b", 1, Some(1), &"b".repeat(300)),
            chunk("c", 2, Some(1), &"c".repeat(300)),
        ];

        let merged = merge_short_chunks(chunks, 100);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].chunk_id, "a");
        assert_eq!(merged[0].chunk_index, 0);
        assert!(merged[0].merged);
        assert!(merged[0].text.starts_with("Tilt angle. bbb"));
        assert_eq!(merged[1].chunk_id, "c");
    }

    #[test]
    fn short_chunks_do_not_merge_across_pages() {
        let chunks = vec![
            chunk("a", 0, Some(1), "Tilt angle."),
            chunk("b", 1, Some(2), "Azimuth."),
            chunk("c", 2, None, "Shading."),
            chunk("d", 3, None, "Soiling."),
        ];

        let merged = merge_short_chunks(chunks, 100);
        let ids = merged.iter().map(|chunk| chunk.chunk_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!merged[0].merged);
        assert!(!merged[1].merged);
        assert!(merged[2].merged);
        assert_eq!(merged[2].text, "Shading. Soiling.");
    }

    #[test]
    fn merged_chunk_is_not_merged_again() {
        let chunks = vec![
            chunk("a", 0, None, "One."),
            chunk("b", 1, None, "Two."),
            chunk("c", 2, None, "Three."),
        ];

        let merged = merge_short_chunks(chunks, 100);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "One. Two.");
        assert_eq!(merged[1].text, "Three.");
        assert!(!merged[1].merged);
    }

    #[test]
    fn oversized_chunk_splits_on_paragraphs() {
        let config = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 10,
            min_chunk_chars: 20,
            max_chunk_ratio: 1.5,
        };
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(60), "b".repeat(30), "c".repeat(80));
        let parent = chunk("parent", 0, Some(4), &text);

        let split = split_oversized_chunks(vec![parent], &config);
        let texts = split.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();

        assert_eq!(texts, vec![format!("{}\n\n{}", "a".repeat(60), "b".repeat(30)), "c".repeat(80)]);
        for (index, chunk) in split.iter().enumerate() {
            assert_eq!(chunk.chunk_index, index);
            assert_eq!(chunk.page, Some(4));
            assert_eq!(chunk.parent_chunk_id.as_deref(), Some("parent"));
            assert_ne!(chunk.chunk_id, "parent");
        }
    }

    #[test]
    fn oversized_chunk_without_paragraphs_splits_on_sentences() {
        let config = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 10,
            min_chunk_chars: 20,
            max_chunk_ratio: 1.5,
        };
        let sentence = format!("{}.", "s".repeat(39));
        let text = vec![sentence.clone(); 5].join(" ");

        let split = split_oversized_chunks(vec![chunk("parent", 7, None, &text)], &config);

        assert_eq!(split.len(), 3);
        assert_eq!(split[0].text, format!("{sentence} {sentence}"));
        assert!(split.iter().all(|chunk| chunk.char_len() <= 100));
    }

    #[test]
    fn unbreakable_oversized_chunk_is_hard_cut() {
        let config = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 10,
            min_chunk_chars: 20,
            max_chunk_ratio: 1.5,
        };
        let split = split_oversized_chunks(vec![chunk("p", 0, None, &"z".repeat(320))], &config);

        assert_eq!(split.len(), 4);
        assert!(split.iter().all(|chunk| chunk.char_len() <= 100));
    }

    #[test]
    fn every_unmerged_chunk_respects_the_ceiling() {
        let config = ChunkingConfig {
            chunk_size: 120,
            chunk_overlap: 20,
            min_chunk_chars: 100,
            max_chunk_ratio: 1.5,
        };
        let texts = [
            words_text(5_000),
            format!("Short.\n\n{}\n\n{}", words_text(400), "Module wattage. ".repeat(40)),
            "Q? A! ".repeat(300),
        ];

        for text in &texts {
            let chunks = build_chunks(SOURCE, &extraction(text), &config).unwrap();
            assert!(!chunks.is_empty());
            for chunk in chunks.iter().filter(|chunk| !chunk.merged) {
                assert!(chunk.char_len() as f64 <= config.max_chunk_chars());
            }
        }
    }

    #[test]
    fn adjacent_short_chunks_on_one_page_do_not_survive() {
        let config = ChunkingConfig {
            chunk_size: 150,
            chunk_overlap: 0,
            min_chunk_chars: 100,
            max_chunk_ratio: 10.0,
        };
        let text = format!("{}. ", "a".repeat(88)).repeat(10);
        let chunks = build_chunks(SOURCE, &extraction(&text), &config).unwrap();

        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|chunk| chunk.merged && chunk.char_len() == 181));
        for pair in chunks.windows(2) {
            let both_short = pair[0].char_len() < 100 && pair[1].char_len() < 100;
            assert!(!(both_short && pair[0].page == pair[1].page && !pair[0].merged));
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..ChunkingConfig::default()
        };
        assert!(matches!(
            build_chunks(SOURCE, &extraction("text"), &config),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}

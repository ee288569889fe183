use crate::error::RerankError;
use crate::models::RetrievedChunk;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub similarity_weight: f64,
    pub keyword_weight: f64,
    pub length_weight: f64,
    pub length_peak_chars: usize,
    pub length_zero_chars: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.6,
            keyword_weight: 0.3,
            length_weight: 0.1,
            length_peak_chars: 1000,
            length_zero_chars: 2000,
        }
    }
}

pub fn query_terms(query: &str) -> HashSet<String> {
    query.to_lowercase().split_whitespace().map(str::to_string).collect()
}

pub fn keyword_score(terms: &HashSet<String>, text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let lowered = text.to_lowercase();
    let hits = terms.iter().filter(|term| lowered.contains(term.as_str())).count();
    hits as f64 / terms.len() as f64
}

/// Rises linearly to 1 at `peak` characters, falls linearly to 0 at `zero`, and stays 0 beyond.
pub fn length_score(chars: usize, peak: usize, zero: usize) -> f64 {
    if chars < peak {
        chars as f64 / peak as f64
    } else if chars < zero {
        (zero - chars) as f64 / (zero - peak) as f64
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    pub fn combined_score(&self, terms: &HashSet<String>, chunk: &RetrievedChunk) -> f64 {
        let chars = chunk.text.chars().count();
        self.config.similarity_weight * chunk.similarity
            + self.config.keyword_weight * keyword_score(terms, &chunk.text)
            + self.config.length_weight
                * length_score(chars, self.config.length_peak_chars, self.config.length_zero_chars)
    }

    pub fn rerank(
        &self,
        query: &str,
        mut chunks: Vec<RetrievedChunk>,
        max_chunks: usize,
    ) -> Vec<RetrievedChunk> {
        if chunks.is_empty() {
            return chunks;
        }

        match self.try_rerank(query, &chunks, max_chunks) {
            Ok(ranked) => {
                debug!(candidates = chunks.len(), kept = ranked.len(), "reranked chunks");
                ranked
            }
            Err(error) => {
                warn!(%error, "reranking failed, keeping retrieval order");
                chunks.truncate(max_chunks);
                chunks
            }
        }
    }

    fn try_rerank(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        max_chunks: usize,
    ) -> Result<Vec<RetrievedChunk>, RerankError> {
        let terms = query_terms(query);

        let mut scored = chunks
            .iter()
            .map(|chunk| {
                if !chunk.similarity.is_finite() {
                    return Err(RerankError::NonFiniteScore {
                        chunk_id: chunk.chunk_id.clone(),
                    });
                }
                let mut chunk = chunk.clone();
                chunk.rerank_score = Some(self.combined_score(&terms, &chunk));
                Ok(chunk)
            })
            .collect::<Result<Vec<_>, _>>()?;

        scored.sort_by(|a, b| {
            let left = a.rerank_score.unwrap_or_default();
            let right = b.rerank_score.unwrap_or_default();
            right.total_cmp(&left)
        });
        scored.truncate(max_chunks);

        for (position, chunk) in scored.iter_mut().enumerate() {
            chunk.rank = position + 1;
        }

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn candidate(id: &str, text: &str, similarity: f64, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            similarity,
            rank,
            rerank_score: None,
        }
    }

    #[test]
    fn length_score_is_triangular() {
        assert_eq!(length_score(0, 1000, 2000), 0.0);
        assert!((length_score(500, 1000, 2000) - 0.5).abs() < 1e-12);
        assert_eq!(length_score(1000, 1000, 2000), 1.0);
        assert!((length_score(1500, 1000, 2000) - 0.5).abs() < 1e-12);
        assert_eq!(length_score(2000, 1000, 2000), 0.0);
        assert_eq!(length_score(5000, 1000, 2000), 0.0);
    }

    #[test]
    fn keyword_score_counts_distinct_terms_by_substring() {
        let terms = query_terms("Battery battery STORAGE cost");
        assert_eq!(terms.len(), 3);
        assert!((keyword_score(&terms, "Battery packs for home storage") - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(keyword_score(&HashSet::new(), "anything"), 0.0);
    }

    #[test]
    fn combined_score_uses_configured_weights() {
        let reranker = Reranker::default();
        let terms = query_terms("inverter");
        let chunk = candidate("c1", &"inverter ".repeat(100)[..500], 0.5, 1);

        let expected = 0.6 * 0.5 + 0.3 * 1.0 + 0.1 * 0.5;
        assert!((reranker.combined_score(&terms, &chunk) - expected).abs() < 1e-12);
    }

    #[test]
    fn output_is_sorted_and_truncated() {
        let reranker = Reranker::default();
        let chunks = vec![
            candidate("low", "unrelated text", 0.1, 1),
            candidate("high", "solar inverter sizing guide", 0.9, 2),
            candidate("mid", "solar basics", 0.5, 3),
        ];

        let ranked = reranker.rerank("solar inverter", chunks, 2);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk_id, "high");
        assert_eq!(ranked[1].chunk_id, "mid");
        assert!(ranked
            .windows(2)
            .all(|pair| pair[0].rerank_score >= pair[1].rerank_score));
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn ties_keep_retrieval_order() {
        let reranker = Reranker::default();
        let chunks = vec![
            candidate("first", "same text", 0.8, 1),
            candidate("second", "same text", 0.8, 2),
            candidate("third", "same text", 0.8, 3),
        ];

        let ids: Vec<String> = reranker
            .rerank("panel", chunks, 5)
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn non_finite_similarity_falls_back_to_input_order() {
        let reranker = Reranker::default();
        let chunks = vec![
            candidate("a", "alpha", 0.2, 1),
            candidate("b", "solar", f64::NAN, 2),
            candidate("c", "solar solar", 0.9, 3),
        ];

        let result = reranker.rerank("solar", chunks, 2);
        let ids: Vec<&str> = result.iter().map(|chunk| chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(result.iter().all(|chunk| chunk.rerank_score.is_none()));
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(Reranker::default().rerank("query", Vec::new(), 3).is_empty());
    }
}

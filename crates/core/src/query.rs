use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const ACRONYMS: [(&str, &str); 8] = [
    ("solar pv", "solar photovoltaic"),
    ("roi", "return on investment"),
    ("pv", "photovoltaic"),
    ("kwh", "kilowatt hour"),
    ("kw", "kilowatt"),
    ("mw", "megawatt"),
    ("ac", "alternating current"),
    ("dc", "direct current"),
];

const MAX_TUNED_CHUNKS: usize = 10;
const MIN_BEGINNER_CHUNKS: usize = 3;
const MIN_TUNED_THRESHOLD: f64 = 0.6;

fn acronym_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ACRONYMS
            .iter()
            .filter_map(|(short, long)| {
                Regex::new(&format!(r"\b{}\b", regex::escape(short)))
                    .ok()
                    .map(|pattern| (pattern, *long))
            })
            .collect()
    })
}

pub fn preprocess_query(query: &str) -> String {
    let mut processed = query.to_lowercase();

    for (pattern, expansion) in acronym_patterns() {
        processed = pattern.replace_all(&processed, *expansion).into_owned();
    }

    if processed.split_whitespace().count() <= 3 {
        if processed.contains("cost") || processed.contains("price") {
            processed.push_str(" solar panel system cost pricing installation");
        } else if processed.contains("efficiency") {
            processed.push_str(" solar panel efficiency performance output");
        } else if processed.contains("install") {
            processed.push_str(" solar panel installation process requirements");
        }
    }

    processed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expertise {
    #[default]
    Beginner,
    Intermediate,
    Expert,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub expertise: Expertise,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    pub max_chunks: usize,
    pub similarity_threshold: f64,
}

pub fn tune_retrieval_params(
    query: &str,
    defaults: RetrievalParams,
    user: Option<&UserContext>,
) -> RetrievalParams {
    let mut params = defaults;
    let words = query.split_whitespace().count();

    if words > 15 {
        params.max_chunks = (params.max_chunks + 2).min(MAX_TUNED_CHUNKS);
    } else if words < 5 {
        params.similarity_threshold = (params.similarity_threshold - 0.05).max(MIN_TUNED_THRESHOLD);
    }

    if let Some(user) = user {
        match user.expertise {
            Expertise::Expert => params.max_chunks = (params.max_chunks + 1).min(MAX_TUNED_CHUNKS),
            Expertise::Beginner => {
                params.max_chunks = params.max_chunks.saturating_sub(1).max(MIN_BEGINNER_CHUNKS)
            }
            Expertise::Intermediate => {}
        }
    }

    params
}

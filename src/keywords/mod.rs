//! Keyword extraction.
//!
//! The projector only needs *some* set of keywords per abstract; the heuristic
//! producing them sits behind [`KeywordExtractor`] so it can be swapped without
//! touching the projector's structural guarantees.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Default number of keywords kept per abstract.
pub const DEFAULT_TOP_N: usize = 10;

/// Words that carry no topical signal in paper abstracts.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "up", "about", "into", "through", "during", "is", "are", "was", "were", "be", "been",
    "being", "have", "has", "had", "do", "does", "did", "will", "would", "could", "should", "may",
    "might", "can", "this", "that", "these", "those", "we", "our", "use", "using", "based",
    "approach", "method", "paper", "propose", "proposed", "show",
];

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z]{3,}\b").expect("static keyword pattern is valid"));

/// Capability that turns an abstract into a set of index keywords.
///
/// Implementations must be deterministic for a given input and return
/// distinct, lower-case, non-empty keywords. An empty input yields an empty
/// set; that is a documented limitation, not an error.
pub trait KeywordExtractor: Send + Sync {
    /// Extract keywords from `text`, most significant first.
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Frequency-based extractor with a stopword filter.
///
/// Lower-cases the text, keeps alphabetic tokens of at least three letters,
/// drops stopwords, and returns the `top_n` most frequent tokens. Ties are
/// broken by first occurrence.
#[derive(Debug, Clone)]
pub struct StopwordExtractor {
    top_n: usize,
    stopwords: HashSet<String>,
}

impl StopwordExtractor {
    /// Create an extractor with the default stopword list.
    ///
    /// # Arguments
    /// * `top_n` - Maximum number of keywords returned (default: 10)
    pub fn new(top_n: Option<usize>) -> Self {
        Self {
            top_n: top_n.unwrap_or(DEFAULT_TOP_N),
            stopwords: DEFAULT_STOPWORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Add extra stopwords on top of the defaults.
    pub fn with_stopwords<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stopwords
            .extend(extra.into_iter().map(|w| w.into().to_lowercase()));
        self
    }
}

impl Default for StopwordExtractor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl KeywordExtractor for StopwordExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() || self.top_n == 0 {
            return Vec::new();
        }

        let lowered = text.to_lowercase();
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, word) in WORD_PATTERN
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|w| !self.stopwords.contains(*w))
            .enumerate()
        {
            counts.entry(word).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .map(|(word, (count, first_seen))| (word, count, first_seen))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        ranked
            .into_iter()
            .take(self.top_n)
            .map(|(word, _, _)| word.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_abstract_yields_no_keywords() {
        let extractor = StopwordExtractor::default();
        assert!(extractor.extract("").is_empty());
        assert!(extractor.extract("   \n ").is_empty());
    }

    #[test]
    fn test_stopwords_and_short_tokens_dropped() {
        let extractor = StopwordExtractor::default();
        let keywords = extractor.extract("We propose an AI method for the graph of graphs");
        assert_eq!(keywords, vec!["graph", "graphs"]);
    }

    #[test]
    fn test_ranked_by_frequency_then_first_occurrence() {
        let extractor = StopwordExtractor::default();
        let keywords = extractor.extract(
            "Quantum circuits. Noise in quantum circuits. Quantum error correction.",
        );
        assert_eq!(keywords[0], "quantum");
        assert_eq!(keywords[1], "circuits");
        assert_eq!(&keywords[2..], &["noise", "error", "correction"]);
    }

    #[test]
    fn test_top_n_bounds_output() {
        let extractor = StopwordExtractor::new(Some(2));
        let keywords = extractor.extract("alpha beta gamma delta alpha beta alpha");
        assert_eq!(keywords, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_mixed_tokens_follow_word_boundaries() {
        let extractor = StopwordExtractor::default();
        let keywords = extractor.extract("Word2vec embeddings beat GloVe-style vectors");
        assert!(!keywords.contains(&"word".to_string()));
        assert!(keywords.contains(&"glove".to_string()));
        assert!(keywords.contains(&"style".to_string()));
    }

    #[test]
    fn test_extra_stopwords() {
        let extractor = StopwordExtractor::default().with_stopwords(["Results"]);
        assert_eq!(extractor.extract("results results matter"), vec!["matter"]);
    }
}

//! Relevance scoring over mirrored knowledge records.
//!
//! A question and each record are normalized (lowercase, diacritics folded,
//! punctuation stripped, whitespace collapsed) and turned into term-frequency
//! vectors. The score is their cosine similarity plus a capped boost for
//! question terms that appear in the record's curated keywords.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use concierge_core::config::SearchConfig;
use concierge_core::{KnowledgeRecord, RelevanceResult};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("Invalid punctuation regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

// =============================================================================
// Normalization
// =============================================================================

/// Normalize text for matching: lowercase, fold diacritics, replace
/// punctuation with spaces and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c))
        .map(fold_diacritic)
        .collect();
    let stripped = NON_WORD.replace_all(&folded, " ");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&c)
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'ğ' | 'ģ' => 'g',
        'í' | 'ì' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => 'i',
        'ł' | 'ľ' | 'ļ' => 'l',
        'ñ' | 'ń' | 'ň' | 'ņ' => 'n',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
        'ŕ' | 'ř' => 'r',
        'ś' | 'š' | 'ş' | 'ș' => 's',
        'ť' | 'ţ' | 'ț' => 't',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        other => other,
    }
}

/// Split normalized text into terms of at least `min_len` characters.
fn tokenize(normalized: &str, min_len: usize) -> Vec<String> {
    normalized
        .split(' ')
        .filter(|t| t.chars().count() >= min_len)
        .map(String::from)
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, f64> {
    let mut tf = HashMap::new();
    for token in tokens {
        *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
    }
    tf
}

fn magnitude(tf: &HashMap<&str, f64>) -> f64 {
    tf.values().map(|v| v * v).sum::<f64>().sqrt()
}

/// Cosine similarity between two sparse term-frequency vectors.
///
/// Returns 0.0 if either vector is empty.
fn cosine_similarity(a: &HashMap<&str, f64>, b: &HashMap<&str, f64>) -> f64 {
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();

    dot / (mag_a * mag_b)
}

// =============================================================================
// Scoring
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum ScoreError {
    #[error("record {0} has no searchable text")]
    Empty(String),
    #[error("record {0} produced a non-finite score")]
    NonFinite(String),
}

/// A question prepared once and scored against many records.
struct QueryTerms {
    tokens: Vec<String>,
    unique: Vec<String>,
}

impl QueryTerms {
    fn new(question: &str, min_len: usize) -> Self {
        let tokens = tokenize(&normalize(question), min_len);
        let mut seen = HashSet::new();
        let unique = tokens
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();
        Self { tokens, unique }
    }
}

/// Best FAQ plus ranked articles for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridSearchResult {
    pub faq: Option<RelevanceResult>,
    pub articles: Vec<RelevanceResult>,
    pub has_results: bool,
}

/// Ranks knowledge records by textual relevance to a question.
#[derive(Debug, Clone)]
pub struct RelevanceSearchEngine {
    faq_threshold: f64,
    article_threshold: f64,
    max_articles: usize,
    keyword_boost: f64,
    max_keyword_boost: f64,
    min_token_len: usize,
}

impl Default for RelevanceSearchEngine {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl RelevanceSearchEngine {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            faq_threshold: config.faq_threshold,
            article_threshold: config.article_threshold,
            max_articles: config.max_articles,
            keyword_boost: config.keyword_boost,
            max_keyword_boost: config.max_keyword_boost,
            min_token_len: config.min_token_len,
        }
    }

    /// Relevance of `record` to `question` in `[0, 1]`.
    ///
    /// A record that cannot be scored counts as 0.
    pub fn score(&self, question: &str, record: &KnowledgeRecord) -> f64 {
        let query = QueryTerms::new(question, self.min_token_len);
        self.score_or_zero(&query, record)
    }

    /// The single best FAQ scoring strictly above the FAQ threshold.
    ///
    /// On equal scores the earlier record wins.
    pub fn find_best_faq_match(
        &self,
        question: &str,
        faqs: &[KnowledgeRecord],
    ) -> Option<RelevanceResult> {
        let query = QueryTerms::new(question, self.min_token_len);
        self.best_faq(&query, faqs)
    }

    /// Up to `max_articles` articles scoring strictly above the article
    /// threshold, best first; equal scores keep input order.
    pub fn find_relevant_articles(
        &self,
        question: &str,
        articles: &[KnowledgeRecord],
    ) -> Vec<RelevanceResult> {
        let query = QueryTerms::new(question, self.min_token_len);
        self.relevant_articles(&query, articles)
    }

    /// Run the FAQ and article searches over already-loaded collections.
    pub fn hybrid_search(
        &self,
        question: &str,
        faqs: &[KnowledgeRecord],
        articles: &[KnowledgeRecord],
    ) -> HybridSearchResult {
        let query = QueryTerms::new(question, self.min_token_len);
        let faq = self.best_faq(&query, faqs);
        let articles = self.relevant_articles(&query, articles);
        let has_results = faq.is_some() || !articles.is_empty();

        debug!(
            faq = faq.as_ref().map(|r| r.record.id.as_str()),
            articles = articles.len(),
            "Hybrid search complete"
        );

        HybridSearchResult {
            faq,
            articles,
            has_results,
        }
    }

    // -- Private helpers --

    fn best_faq(&self, query: &QueryTerms, faqs: &[KnowledgeRecord]) -> Option<RelevanceResult> {
        let mut best: Option<(usize, f64)> = None;
        for (index, record) in faqs.iter().enumerate() {
            let score = self.score_or_zero(query, record);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((index, score));
            }
        }

        best.filter(|(_, score)| *score > self.faq_threshold)
            .map(|(index, score)| RelevanceResult::new(faqs[index].clone(), score))
    }

    fn relevant_articles(
        &self,
        query: &QueryTerms,
        articles: &[KnowledgeRecord],
    ) -> Vec<RelevanceResult> {
        let mut scored: Vec<(usize, f64)> = articles
            .iter()
            .enumerate()
            .map(|(index, record)| (index, self.score_or_zero(query, record)))
            .filter(|(_, score)| *score > self.article_threshold)
            .collect();

        // Stable sort keeps input order for ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.max_articles);

        scored
            .into_iter()
            .map(|(index, score)| RelevanceResult::new(articles[index].clone(), score))
            .collect()
    }

    fn score_or_zero(&self, query: &QueryTerms, record: &KnowledgeRecord) -> f64 {
        match self.try_score(query, record) {
            Ok(score) => score,
            Err(e) => {
                debug!(error = %e, "Record scored as zero");
                0.0
            }
        }
    }

    fn try_score(&self, query: &QueryTerms, record: &KnowledgeRecord) -> Result<f64, ScoreError> {
        let record_text = normalize(&record.searchable_text());
        if record_text.is_empty() {
            return Err(ScoreError::Empty(record.id.clone()));
        }

        let record_tokens = tokenize(&record_text, self.min_token_len);
        let similarity = cosine_similarity(
            &term_frequencies(&query.tokens),
            &term_frequencies(&record_tokens),
        );

        let boost = self.keyword_boost(query, record);
        let score = (similarity + boost).min(1.0);
        if !score.is_finite() {
            return Err(ScoreError::NonFinite(record.id.clone()));
        }
        Ok(score.max(0.0))
    }

    /// Substring match of each distinct question term against the record's
    /// normalized keyword text, so "pix" also matches "pixel".
    fn keyword_boost(&self, query: &QueryTerms, record: &KnowledgeRecord) -> f64 {
        if record.keywords.is_empty() {
            return 0.0;
        }
        let keywords = normalize(&record.keyword_text());
        let hits = query
            .unique
            .iter()
            .filter(|term| keywords.contains(term.as_str()))
            .count();
        (hits as f64 * self.keyword_boost).min(self.max_keyword_boost)
    }
}

// =============================================================================
// Tests
// =============================================================================

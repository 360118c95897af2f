//! Hybrid retrieval over the skill index and snippet extraction.

use std::collections::BTreeSet;
use std::sync::Arc;

use skillport_core::EmbeddingError;
use tracing::debug;

use crate::index::{tokenize, IndexEntry, SkillIndex};
use crate::models::{MatchKind, SearchResult, SearchResults};

/// Weight of the vector score in the hybrid combination.
pub const VECTOR_WEIGHT: f64 = 0.7;

/// Weight of the lexical score in the hybrid combination.
pub const LEXICAL_WEIGHT: f64 = 0.3;

// ── Snippet Extraction ──────────────────────────────────────────────────

/// Extract a snippet around a search term match.
///
/// Returns a portion of the content centered around the first match,
/// with ellipsis indicators if truncated.
pub fn extract_snippet(content: &str, term: &str, context_chars: usize) -> Option<String> {
    let (pos, match_end) = find_ignore_case(content, term)?;
    let start = pos.saturating_sub(context_chars);
    let end = (match_end + context_chars).min(content.len());

    // Snap to word boundaries.
    let start = find_word_start(content, start);
    let end = find_word_end(content, end);

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(content[start..end].trim());
    if end < content.len() {
        snippet.push_str("...");
    }

    let snippet = snippet
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some(snippet)
}

/// Byte range in `content` of the first case-insensitive match of `term`.
///
/// Lowercasing can change byte lengths outside ASCII, so each byte of the
/// lowercased text remembers the char of `content` it came from.
fn find_ignore_case(content: &str, term: &str) -> Option<(usize, usize)> {
    let term_lower = term.to_lowercase();
    if term_lower.is_empty() {
        return None;
    }

    let mut lower = String::with_capacity(content.len());
    let mut origin = Vec::with_capacity(content.len());
    for (idx, ch) in content.char_indices() {
        lower.extend(ch.to_lowercase());
        origin.resize(lower.len(), idx);
    }

    let pos = lower.find(&term_lower)?;
    let start = origin[pos];
    let last = origin[pos + term_lower.len() - 1];
    let end = last + content[last..].chars().next().map_or(0, char::len_utf8);
    Some((start, end))
}

fn find_word_start(content: &str, pos: usize) -> usize {
    if pos == 0 {
        return 0;
    }
    let bytes = content.as_bytes();
    let mut start = pos;
    while start > 0 && !bytes[start - 1].is_ascii_whitespace() {
        start -= 1;
    }
    start
}

fn find_word_end(content: &str, pos: usize) -> usize {
    if pos >= content.len() {
        return content.len();
    }
    let bytes = content.as_bytes();
    let mut end = pos;
    while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
        end += 1;
    }
    end
}

// ── Scoring ─────────────────────────────────────────────────────────────

/// Cosine similarity clamped to `[0, 1]`. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    ((dot_product / (norm_a * norm_b)) as f64).clamp(0.0, 1.0)
}

/// Distinct query terms in first-seen order.
fn query_terms(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn score_entry(
    entry: &IndexEntry,
    terms: &[String],
    query_vector: Option<&[f32]>,
) -> Option<SearchResult> {
    let lexical = entry.lexical_score(terms);
    let vector = match (query_vector, entry.vector.as_deref()) {
        (Some(q), Some(v)) if q.len() == v.len() => Some(cosine_similarity(q, v)),
        _ => None,
    };

    let (score, match_kind) = match vector {
        Some(v) => {
            let kind = if lexical > 0.0 {
                MatchKind::Hybrid
            } else {
                MatchKind::Semantic
            };
            (VECTOR_WEIGHT * v + LEXICAL_WEIGHT * lexical, kind)
        }
        None => (lexical, MatchKind::Lexical),
    };

    if score <= 0.0 {
        return None;
    }

    Some(SearchResult {
        id: entry.id.clone(),
        title: entry.title.clone(),
        description: entry.description.clone(),
        score,
        lexical_score: lexical,
        vector_score: vector,
        match_kind,
        snippet: None,
    })
}

fn snippet_for(entry: &IndexEntry, terms: &[String]) -> Option<String> {
    terms
        .iter()
        .filter(|t| entry.terms.body.contains_key(*t))
        .find_map(|t| extract_snippet(&entry.body, t, SearchService::DEFAULT_SNIPPET_CONTEXT))
}

// ── Search Service ──────────────────────────────────────────────────────

/// Ranks indexed skills against a natural-language query.
#[derive(Clone)]
pub struct SearchService {
    index: Arc<SkillIndex>,
}

impl SearchService {
    /// Default context size for snippets.
    const DEFAULT_SNIPPET_CONTEXT: usize = 50;

    pub fn new(index: Arc<SkillIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<SkillIndex> {
        &self.index
    }

    /// Hybrid search. Falls back to lexical scores when no query vector is
    /// available; fails only when the provider propagates an error.
    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchResults, EmbeddingError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(SearchResults::empty(query));
        }

        let entries = self.index.snapshot();
        if entries.is_empty() {
            return Ok(SearchResults::empty(query));
        }

        let query_vector = self.index.provider().embed(query).await?;
        let terms = query_terms(query);

        let results: Vec<SearchResult> = entries
            .iter()
            .filter_map(|entry| {
                let result = score_entry(entry, &terms, query_vector.as_deref())?;
                let snippet = snippet_for(entry, &terms)
                    .unwrap_or_else(|| entry.description.clone());
                Some(result.with_snippet(snippet))
            })
            .collect();

        debug!(
            "Search '{}' matched {} of {} skills ({})",
            query,
            results.len(),
            entries.len(),
            if query_vector.is_some() { "hybrid" } else { "lexical" }
        );

        Ok(SearchResults::new(
            query.to_string(),
            results,
            limit,
            query_vector.is_none(),
        ))
    }
}

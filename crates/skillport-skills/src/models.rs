//! Core data models for the skill system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

// ── Skill ───────────────────────────────────────────────────────────────

/// YAML front matter of a `SKILL.md` descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillFrontmatter {
    /// Display name. Falls back to the skill id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// What the skill provides and when to use it.
    pub description: String,

    #[serde(default)]
    pub metadata: SkillMetadata,
}

/// Optional metadata block in the front matter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillMetadata {
    /// Search keywords.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A skill package as found on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Skill {
    /// Package directory relative to the skills root, `/`-separated.
    pub id: String,

    pub title: String,

    pub description: String,

    /// Descriptor body after the front matter.
    pub content: String,

    /// Absolute path of the package directory.
    pub source_path: PathBuf,

    /// Modification time of the descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// SHA-256 of the raw descriptor.
    pub content_hash: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Skill {
    /// Text sent to the embedding provider for this skill.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}\n{}", self.title, self.description);
        if !self.tags.is_empty() {
            text.push('\n');
            text.push_str(&self.tags.join(" "));
        }
        text.push('\n');
        text.push_str(&self.content);
        text
    }
}

/// Outcome of a repository scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Skills in id order.
    pub skills: Vec<Skill>,

    /// Packages that were skipped, with the reason.
    pub errors: Vec<String>,
}

impl ScanResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ── Loader output ───────────────────────────────────────────────────────

/// Full skill content returned by `load_skill`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillContent {
    pub id: String,
    pub title: String,
    pub description: String,

    /// Descriptor body.
    pub instructions: String,

    /// Absolute package directory.
    pub path: PathBuf,

    /// Other files in the package, relative to `path`.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Content of a file inside a skill package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => FileContent::Text(text),
            Err(e) => FileContent::Binary(e.into_bytes()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FileContent::Text(t) => t.len(),
            FileContent::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file read through `read_skill_file`.
#[derive(Debug, Clone)]
pub struct SkillFile {
    pub skill_id: String,
    pub path: String,
    pub content: FileContent,
}

// ── Search ──────────────────────────────────────────────────────────────

/// Which signals produced a hit's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Vector and lexical scores combined.
    Hybrid,
    /// Vector similarity only; no query term matched.
    Semantic,
    /// Lexical score only.
    Lexical,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Hybrid => "hybrid",
            MatchKind::Semantic => "semantic",
            MatchKind::Lexical => "lexical",
        }
    }
}

/// Field a query term can match, with its weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Name,
    Tags,
    Description,
    Body,
}

impl MatchField {
    pub const MAX_WEIGHT: f64 = 3.0;

    pub fn weight(&self) -> f64 {
        match self {
            MatchField::Name => 3.0,
            MatchField::Tags => 2.0,
            MatchField::Description => 1.5,
            MatchField::Body => 1.0,
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub description: String,

    /// Final combined score in `[0, 1]`.
    pub score: f64,

    pub lexical_score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,

    pub match_kind: MatchKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SearchResult {
    pub fn with_snippet(mut self, snippet: String) -> Self {
        self.snippet = Some(snippet);
        self
    }
}

impl PartialEq for SearchResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchResult {}

impl PartialOrd for SearchResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchResult {
    fn cmp(&self, other: &Self) -> Ordering {
        // Score descending, then id ascending.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Results from a search operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matched results, sorted by relevance.
    pub results: Vec<SearchResult>,

    /// Original query.
    pub query: String,

    /// Total matches before limit applied.
    pub total_matches: usize,

    /// Whether results were truncated.
    pub truncated: bool,

    /// No query vector was available; ranking used lexical scores only.
    pub lexical_only: bool,
}

impl SearchResults {
    /// Sort and truncate.
    pub fn new(
        query: String,
        mut results: Vec<SearchResult>,
        limit: usize,
        lexical_only: bool,
    ) -> Self {
        results.sort();

        let total_matches = results.len();
        let truncated = total_matches > limit;
        results.truncate(limit);

        Self {
            results,
            query,
            total_matches,
            truncated,
            lexical_only,
        }
    }

    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            query: query.into(),
            total_matches: 0,
            truncated: false,
            lexical_only: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn top(&self) -> Option<&SearchResult> {
        self.results.first()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }
}

// ── Index maintenance ───────────────────────────────────────────────────

/// Counts from a full index rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Packages skipped because their descriptor was unusable.
    pub skipped: usize,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RebuildReport {
    pub fn total_indexed(&self) -> usize {
        self.added + self.updated + self.unchanged
    }
}

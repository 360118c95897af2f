//! In-memory skill index with optional vectors and a JSON snapshot on disk.
//!
//! Entries are immutable `Arc<IndexEntry>` values swapped under a short
//! write lock, so readers always see a whole entry. Writers (upsert, remove,
//! rebuild) are serialized on an async mutex held across embedding calls.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use skillport_core::EmbeddingProvider;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SkillError, SkillResult};
use crate::models::{MatchField, RebuildReport, Skill};
use crate::repository::SkillRepository;

const SNAPSHOT_VERSION: u32 = 1;

// ── Lexical data ────────────────────────────────────────────────────────

/// Lowercase alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn term_counts(text: &str) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

/// Term frequencies per searchable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexicalTerms {
    pub name: BTreeMap<String, u32>,
    pub tags: BTreeMap<String, u32>,
    pub description: BTreeMap<String, u32>,
    pub body: BTreeMap<String, u32>,
}

impl LexicalTerms {
    pub fn from_skill(skill: &Skill) -> Self {
        Self {
            name: term_counts(&format!("{} {}", skill.title, skill.id)),
            tags: term_counts(&skill.tags.join(" ")),
            description: term_counts(&skill.description),
            body: term_counts(&skill.content),
        }
    }

    fn field(&self, field: MatchField) -> &BTreeMap<String, u32> {
        match field {
            MatchField::Name => &self.name,
            MatchField::Tags => &self.tags,
            MatchField::Description => &self.description,
            MatchField::Body => &self.body,
        }
    }

    /// Best weighted, saturated match of one term across fields, in `[0, 1)`.
    pub fn term_score(&self, term: &str) -> f64 {
        [
            MatchField::Name,
            MatchField::Tags,
            MatchField::Description,
            MatchField::Body,
        ]
        .into_iter()
        .filter_map(|field| {
            let count = *self.field(field).get(term)? as f64;
            let tf = count / (count + 0.5);
            Some(field.weight() / MatchField::MAX_WEIGHT * tf)
        })
        .fold(0.0, f64::max)
    }
}

// ── Entries ─────────────────────────────────────────────────────────────

/// One indexed skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub content_hash: String,
    pub body: String,
    pub terms: LexicalTerms,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    /// Provider fingerprint that produced `vector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_fingerprint: Option<String>,
}

impl IndexEntry {
    fn new(skill: &Skill, vector: Option<Vec<f32>>, vector_fingerprint: Option<String>) -> Self {
        Self {
            id: skill.id.clone(),
            title: skill.title.clone(),
            description: skill.description.clone(),
            content_hash: skill.content_hash.clone(),
            body: skill.content.clone(),
            terms: LexicalTerms::from_skill(skill),
            vector,
            vector_fingerprint,
        }
    }

    /// Mean term score over the distinct query terms.
    pub fn lexical_score(&self, query_terms: &[String]) -> f64 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let total: f64 = query_terms.iter().map(|t| self.terms.term_score(t)).sum();
        total / query_terms.len() as f64
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    Unchanged,
}

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    entries: Vec<IndexEntry>,
}

// ── Index ───────────────────────────────────────────────────────────────

/// The maintained index over a skill repository.
pub struct SkillIndex {
    repository: SkillRepository,
    provider: Arc<EmbeddingProvider>,
    entries: RwLock<HashMap<String, Arc<IndexEntry>>>,
    writer: Mutex<()>,
    store_path: Option<PathBuf>,
}

impl SkillIndex {
    pub fn new(repository: SkillRepository, provider: Arc<EmbeddingProvider>) -> Self {
        Self {
            repository,
            provider,
            entries: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            store_path: None,
        }
    }

    /// Persist snapshots to `path` after each rebuild.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn repository(&self) -> &SkillRepository {
        &self.repository
    }

    pub fn provider(&self) -> &Arc<EmbeddingProvider> {
        &self.provider
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    /// All entries, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<IndexEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<_> = entries.values().cloned().collect();
        drop(entries);
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<Arc<IndexEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index one skill, embedding it only when its content or the provider
    /// generation changed.
    pub async fn upsert(&self, skill: &Skill) -> SkillResult<UpsertOutcome> {
        let _guard = self.writer.lock().await;
        self.upsert_locked(skill).await
    }

    /// Drop an entry. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let _guard = self.writer.lock().await;
        self.remove_locked(id)
    }

    /// Re-read the skill `id` from disk and upsert or remove it.
    pub async fn refresh_skill(&self, id: &str) -> SkillResult<()> {
        let _guard = self.writer.lock().await;
        match self.repository.get(id) {
            Ok(skill) => {
                let outcome = self.upsert_locked(&skill).await?;
                debug!("Refreshed skill {}: {:?}", id, outcome);
            }
            Err(SkillError::NotFound(_)) => {
                if self.remove_locked(id) {
                    debug!("Removed skill {}", id);
                }
            }
            Err(e) => {
                warn!("Dropping unreadable skill {}: {}", id, e);
                self.remove_locked(id);
            }
        }
        Ok(())
    }

    /// Reconcile the index with the repository and persist a snapshot.
    pub async fn rebuild(&self) -> SkillResult<RebuildReport> {
        let _guard = self.writer.lock().await;

        let repository = self.repository.clone();
        let scan = tokio::task::spawn_blocking(move || repository.scan())
            .await
            .map_err(|e| SkillError::Store(format!("Repository scan failed: {}", e)))?;

        if scan.has_errors() {
            warn!("{} skill package(s) skipped during rebuild", scan.errors.len());
        }
        let mut report = RebuildReport {
            skipped: scan.errors.len(),
            ..Default::default()
        };

        let mut seen = HashSet::with_capacity(scan.skills.len());
        for skill in &scan.skills {
            if !seen.insert(skill.id.clone()) {
                continue;
            }
            match self.upsert_locked(skill).await? {
                UpsertOutcome::Added => report.added += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }
        }

        let stale: Vec<String> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .keys()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .collect()
        };
        for id in stale {
            self.remove_locked(&id);
            report.removed += 1;
        }

        if let Err(e) = self.save_snapshot() {
            warn!("Failed to persist index snapshot: {}", e);
        }

        report.finished_at = Some(Utc::now());
        info!(
            "Index rebuilt: {} added, {} updated, {} unchanged, {} removed, {} skipped",
            report.added, report.updated, report.unchanged, report.removed, report.skipped
        );
        Ok(report)
    }

    /// Load entries from the snapshot file, if one exists. Vectors from a
    /// different provider generation are dropped.
    pub fn load_snapshot(&self) -> SkillResult<usize> {
        let Some(path) = &self.store_path else {
            return Ok(0);
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| SkillError::Store(format!("Invalid snapshot {:?}: {}", path, e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!("Ignoring index snapshot with version {}", snapshot.version);
            return Ok(0);
        }

        let fingerprint = self.provider.fingerprint();
        let mut dropped = 0;
        let loaded: HashMap<String, Arc<IndexEntry>> = snapshot
            .entries
            .into_iter()
            .map(|mut entry| {
                if entry.vector_fingerprint != fingerprint {
                    if entry.vector.is_some() {
                        dropped += 1;
                    }
                    entry.vector = None;
                    entry.vector_fingerprint = None;
                }
                (entry.id.clone(), Arc::new(entry))
            })
            .collect();

        if dropped > 0 {
            info!("Dropped {} vectors from a different embedding provider", dropped);
        }
        let count = loaded.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        debug!("Loaded {} index entries from {:?}", count, path);
        Ok(count)
    }

    /// Write the current entries to the snapshot file.
    pub fn save_snapshot(&self) -> SkillResult<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            entries: self
                .snapshot()
                .iter()
                .map(|entry| entry.as_ref().clone())
                .collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| SkillError::Store(format!("Failed to serialize snapshot: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    async fn upsert_locked(&self, skill: &Skill) -> SkillResult<UpsertOutcome> {
        let existing = self.get(&skill.id);
        let fingerprint = self.provider.fingerprint();

        let content_same = existing
            .as_ref()
            .is_some_and(|e| e.content_hash == skill.content_hash);
        let vector_current = existing.as_ref().is_some_and(|e| {
            fingerprint.is_none() || (e.vector.is_some() && e.vector_fingerprint == fingerprint)
        });

        if content_same && vector_current {
            return Ok(UpsertOutcome::Unchanged);
        }

        let (vector, vector_fingerprint) = match fingerprint {
            None => (None, None),
            Some(fp) => {
                let vector = self.provider.embed(&skill.embedding_text()).await?;
                let fp = vector.as_ref().map(|_| fp);
                (vector, fp)
            }
        };

        let entry = Arc::new(IndexEntry::new(skill, vector, vector_fingerprint));
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(skill.id.clone(), entry);

        Ok(match previous {
            None => UpsertOutcome::Added,
            Some(_) => UpsertOutcome::Updated,
        })
    }

    fn remove_locked(&self, id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DESCRIPTOR_FILE;
    use crate::test_support::{counting_provider, failing_provider, write_skill};
    use skillport_core::ProviderKind;
    use tempfile::TempDir;

    fn index_over(root: &Path, provider: EmbeddingProvider) -> SkillIndex {
        SkillIndex::new(SkillRepository::new(root), Arc::new(provider))
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Hello-World, PDF_tools v2"),
            vec!["hello", "world", "pdf", "tools", "v2"]
        );
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn test_term_score_prefers_name() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "pdf", "pdf", "Read documents", "Mentions pdf once.");
        let skill = SkillRepository::new(tmp.path()).get("pdf").unwrap();
        let terms = LexicalTerms::from_skill(&skill);

        assert!(terms.term_score("pdf") > terms.term_score("documents"));
        assert!(terms.term_score("documents") > terms.term_score("mentions"));
        assert_eq!(terms.term_score("absent"), 0.0);
        assert!(terms.term_score("pdf") < 1.0);
    }

    #[tokio::test]
    async fn test_upsert_twice_embeds_once() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First skill", "Body text");
        let (provider, backend) = counting_provider(ProviderKind::OpenAiCompatible);
        let index = index_over(tmp.path(), provider);
        let skill = index.repository().get("alpha").unwrap();

        assert_eq!(index.upsert(&skill).await.unwrap(), UpsertOutcome::Added);
        let first = index.get("alpha").unwrap();
        assert_eq!(index.upsert(&skill).await.unwrap(), UpsertOutcome::Unchanged);
        let second = index.get("alpha").unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(*first, *second);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.vector.is_some());
    }

    #[tokio::test]
    async fn test_upsert_reembeds_on_content_change() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First skill", "Body text");
        let (provider, backend) = counting_provider(ProviderKind::Local);
        let index = index_over(tmp.path(), provider);

        index.rebuild().await.unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First skill", "Changed body");
        let skill = index.repository().get("alpha").unwrap();
        assert_eq!(index.upsert(&skill).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(backend.calls(), 2);
        assert_eq!(index.get("alpha").unwrap().body, "Changed body");
    }

    #[tokio::test]
    async fn test_upsert_without_provider_has_no_vector() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First skill", "Body text");
        let index = index_over(tmp.path(), EmbeddingProvider::disabled());
        let skill = index.repository().get("alpha").unwrap();

        index.upsert(&skill).await.unwrap();
        let entry = index.get("alpha").unwrap();
        assert!(entry.vector.is_none());
        assert!(!entry.terms.name.is_empty());
        assert_eq!(index.upsert(&skill).await.unwrap(), UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_upsert_propagated_error_keeps_prior_entry() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First skill", "Body text");
        let (provider, _) = counting_provider(ProviderKind::OpenAi);
        let good = index_over(tmp.path(), provider);
        good.rebuild().await.unwrap();
        let before = good.get("alpha").unwrap();

        // Same entries, failing provider.
        let failing = index_over(tmp.path(), failing_provider(ProviderKind::OpenAi));
        failing
            .entries
            .write()
            .unwrap()
            .insert("alpha".to_string(), before.clone());

        write_skill(tmp.path(), "alpha", "alpha", "First skill", "New body");
        let skill = failing.repository().get("alpha").unwrap();
        let err = failing.upsert(&skill).await.unwrap_err();
        assert!(matches!(err, SkillError::Embedding(_)));
        assert_eq!(*failing.get("alpha").unwrap(), *before);
    }

    #[tokio::test]
    async fn test_local_failure_indexes_lexical_only() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First skill", "Body text");
        let index = index_over(tmp.path(), failing_provider(ProviderKind::Local));

        let report = index.rebuild().await.unwrap();
        assert_eq!(report.added, 1);
        assert!(index.get("alpha").unwrap().vector.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_reconciles() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First", "Body");
        write_skill(tmp.path(), "beta", "beta", "Second", "Body");
        let index = index_over(tmp.path(), EmbeddingProvider::disabled());

        let report = index.rebuild().await.unwrap();
        assert_eq!(report.added, 2);

        std::fs::remove_dir_all(tmp.path().join("beta")).unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First", "Edited");
        write_skill(tmp.path(), "gamma", "gamma", "Third", "Body");
        std::fs::create_dir_all(tmp.path().join("broken")).unwrap();
        std::fs::write(tmp.path().join("broken").join(DESCRIPTOR_FILE), "oops").unwrap();

        let report = index.rebuild().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.skipped, 1);

        let ids: Vec<_> = index.snapshot().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["alpha", "gamma"]);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let index = index_over(tmp.path(), EmbeddingProvider::disabled());
        assert!(!index.remove("missing").await);
    }

    #[tokio::test]
    async fn test_refresh_skill_follows_disk() {
        let tmp = TempDir::new().unwrap();
        let index = index_over(tmp.path(), EmbeddingProvider::disabled());

        write_skill(tmp.path(), "alpha", "alpha", "First", "Body");
        index.refresh_skill("alpha").await.unwrap();
        assert!(index.get("alpha").is_some());

        std::fs::remove_dir_all(tmp.path().join("alpha")).unwrap();
        index.refresh_skill("alpha").await.unwrap();
        assert!(index.get("alpha").is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_drops_foreign_vectors() {
        let tmp = TempDir::new().unwrap();
        let skills = tmp.path().join("skills");
        let store = tmp.path().join("data").join("index.json");
        write_skill(&skills, "alpha", "alpha", "First", "Body");

        let (provider, _) = counting_provider(ProviderKind::Local);
        let index = index_over(&skills, provider).with_store(&store);
        assert_eq!(index.store_path(), Some(store.as_path()));
        index.rebuild().await.unwrap();
        assert!(store.exists());

        // Same generation keeps vectors and skips re-embedding.
        let (provider, backend) = counting_provider(ProviderKind::Local);
        let reloaded = index_over(&skills, provider).with_store(&store);
        assert_eq!(reloaded.load_snapshot().unwrap(), 1);
        assert!(reloaded.get("alpha").unwrap().vector.is_some());
        reloaded.rebuild().await.unwrap();
        assert_eq!(backend.calls(), 0);

        // Different generation drops them.
        let (provider, _) = counting_provider(ProviderKind::OpenAiCompatible);
        let other = index_over(&skills, provider).with_store(&store);
        assert_eq!(other.load_snapshot().unwrap(), 1);
        let entry = other.get("alpha").unwrap();
        assert!(entry.vector.is_none());
        assert!(!entry.terms.body.is_empty());
    }

    #[test]
    fn test_load_snapshot_missing_file() {
        let tmp = TempDir::new().unwrap();
        let index = index_over(tmp.path(), EmbeddingProvider::disabled())
            .with_store(tmp.path().join("none.json"));
        assert_eq!(index.load_snapshot().unwrap(), 0);
    }
}

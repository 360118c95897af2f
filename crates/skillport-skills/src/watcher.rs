//! File system watcher for skill directory changes.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::index::SkillIndex;
use crate::repository::SkillRepository;

/// What the index must do after a change on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    /// Re-read one package.
    Skill(String),
    /// The change could not be attributed to a package.
    Rebuild,
}

/// File watcher that monitors the skills directory for changes.
///
/// Changes inside a package refresh only that skill; anything else triggers
/// a full rebuild.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    updates: Option<mpsc::UnboundedReceiver<IndexUpdate>>,
}

impl FileWatcher {
    /// Create a watcher that maps events through `repository`.
    pub fn new(repository: SkillRepository) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Watch error: {:?}", e);
                    return;
                }
            };

            // Only trigger on file modifications, creations, or deletions.
            if !matches!(
                event.kind,
                notify::EventKind::Create(_)
                    | notify::EventKind::Modify(_)
                    | notify::EventKind::Remove(_)
            ) {
                return;
            }

            for update in classify(&repository, &event.paths) {
                if tx.send(update).is_err() {
                    return;
                }
            }
        })
        .map_err(|e| WatchError::Setup(format!("Failed to create watcher: {}", e)))?;

        Ok(Self {
            watcher,
            updates: Some(rx),
        })
    }

    /// Start watching a directory.
    pub fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watch(format!("Failed to watch {:?}: {}", path, e)))?;

        tracing::info!("Started watching skills directory: {:?}", path);
        Ok(())
    }

    /// Take the update stream. Returns `None` after the first call.
    pub fn updates(&mut self) -> Option<mpsc::UnboundedReceiver<IndexUpdate>> {
        self.updates.take()
    }

    /// Forward updates to `index` until the watcher is dropped.
    pub fn spawn_indexer(&mut self, index: Arc<SkillIndex>) -> Option<tokio::task::JoinHandle<()>> {
        let rx = self.updates()?;
        Some(tokio::spawn(apply_updates(index, rx)))
    }
}

/// Map changed paths to index updates, deduplicated.
fn classify(repository: &SkillRepository, paths: &[std::path::PathBuf]) -> Vec<IndexUpdate> {
    let mut skills = BTreeSet::new();
    let mut rebuild = false;
    for path in paths {
        match repository.skill_from_path(path) {
            Some(id) => {
                skills.insert(id);
            }
            None => rebuild = true,
        }
    }

    if rebuild {
        debug!("File change outside skill packages, doing full rebuild");
        return vec![IndexUpdate::Rebuild];
    }
    skills.into_iter().map(IndexUpdate::Skill).collect()
}

/// Apply updates from the watcher to the index.
pub async fn apply_updates(index: Arc<SkillIndex>, mut rx: mpsc::UnboundedReceiver<IndexUpdate>) {
    while let Some(update) = rx.recv().await {
        match update {
            IndexUpdate::Skill(id) => {
                debug!("Incrementally updating skill: {}", id);
                if let Err(e) = index.refresh_skill(&id).await {
                    warn!("Failed to update skill {}: {}", id, e);
                    if let Err(e) = index.rebuild().await {
                        error!("Failed to rebuild index: {}", e);
                    }
                }
            }
            IndexUpdate::Rebuild => {
                if let Err(e) = index.rebuild().await {
                    error!("Failed to rebuild index: {}", e);
                }
            }
        }
    }
}

/// Errors that can occur with file watching.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize the file watcher.
    #[error("Failed to setup watcher: {0}")]
    Setup(String),

    /// Failed to watch a specific path.
    #[error("Failed to watch path: {0}")]
    Watch(String),
}

//! Skill system for skillport.
//!
//! Provides the on-disk skill repository, built-in skills, the hybrid
//! vector + lexical index and search, the skill loader, and file-watching
//! for automatic reindexing.

pub mod builtin;
pub mod error;
pub mod index;
pub mod loader;
pub mod models;
pub mod repository;
pub mod search;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use error::{SkillError, SkillResult};
pub use index::{IndexEntry, SkillIndex, UpsertOutcome};
pub use loader::SkillLoader;
pub use models::{
    FileContent, MatchKind, RebuildReport, ScanResult, SearchResult, SearchResults, Skill,
    SkillContent, SkillFile,
};
pub use repository::{SkillRepository, DESCRIPTOR_FILE};
pub use search::SearchService;
pub use watcher::{FileWatcher, IndexUpdate, WatchError};

use std::path::PathBuf;

use skillport_core::EmbeddingError;

/// Errors from the skill repository, index, and loader.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    /// No skill with this id, or no such file inside the skill.
    #[error("Skill not found: {0}")]
    NotFound(String),

    /// A relative path resolves outside the skill's package directory.
    #[error("Path '{path}' escapes the package directory of skill '{skill_id}'")]
    PathEscape { skill_id: String, path: String },

    /// The SKILL.md descriptor is missing or malformed.
    #[error("Invalid skill descriptor {path:?}: {reason}")]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Index store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SkillError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SkillError::NotFound(what.into())
    }
}

pub type SkillResult<T> = Result<T, SkillError>;

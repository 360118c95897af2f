//! Loads full skill content and package files straight from disk.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{SkillError, SkillResult};
use crate::models::{FileContent, SkillContent, SkillFile};
use crate::repository::SkillRepository;

/// Reads skills for `load_skill` and `read_skill_file`. Never consults the
/// index, so a freshly edited skill is served as it is on disk.
#[derive(Debug, Clone)]
pub struct SkillLoader {
    repository: SkillRepository,
}

impl SkillLoader {
    pub fn new(repository: SkillRepository) -> Self {
        Self { repository }
    }

    /// Full descriptor body plus the list of other package files.
    pub async fn load(&self, id: &str) -> SkillResult<SkillContent> {
        let repository = self.repository.clone();
        let id = id.to_string();
        let (skill, files) = tokio::task::spawn_blocking(move || {
            let skill = repository.get(&id)?;
            let files = repository.list_files(&id)?;
            Ok::<_, SkillError>((skill, files))
        })
        .await
        .map_err(|e| SkillError::Store(format!("Skill load task failed: {}", e)))??;

        debug!("Loaded skill {} ({} extra files)", skill.id, files.len());
        Ok(SkillContent {
            id: skill.id,
            title: skill.title,
            description: skill.description,
            instructions: skill.content,
            path: skill.source_path,
            files,
        })
    }

    /// Read `relative_path` inside the package of `id`.
    ///
    /// Paths that leave the package, lexically or through a symlink, fail
    /// with `PathEscape`; the lexical check happens before any filesystem
    /// access.
    pub async fn read_file(&self, id: &str, relative_path: &str) -> SkillResult<SkillFile> {
        let escape = || SkillError::PathEscape {
            skill_id: id.to_string(),
            path: relative_path.to_string(),
        };
        let relative = normalize_relative(relative_path).ok_or_else(escape)?;
        if relative.as_os_str().is_empty() {
            return Err(SkillError::not_found(format!("{}/{}", id, relative_path)));
        }

        let dir = self.repository.package_dir(id)?;
        let full = dir.join(&relative);

        let not_found = || SkillError::not_found(format!("{}/{}", id, relative_path));
        let resolved = match tokio::fs::canonicalize(&full).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let root = tokio::fs::canonicalize(&dir).await?;
        if !resolved.starts_with(&root) {
            return Err(escape());
        }
        if !tokio::fs::metadata(&resolved).await?.is_file() {
            return Err(not_found());
        }

        let bytes = tokio::fs::read(&resolved).await?;
        debug!("Read {} bytes from {}/{}", bytes.len(), id, relative.display());
        Ok(SkillFile {
            skill_id: id.to_string(),
            path: relative_path.to_string(),
            content: FileContent::from_bytes(bytes),
        })
    }
}

/// Lexically normalize a package-relative path. `None` if it is absolute or
/// climbs above its starting directory.
fn normalize_relative(path: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

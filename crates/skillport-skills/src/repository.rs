//! On-disk skill packages.
//!
//! A package is any directory under the skills root that contains a
//! `SKILL.md` descriptor. The skill id is the package directory relative to
//! the root, joined with `/`.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::builtin;
use crate::error::{SkillError, SkillResult};
use crate::models::{ScanResult, Skill, SkillFrontmatter};

/// Descriptor file name inside every package.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

/// Read access to the skill packages under one root directory.
#[derive(Debug, Clone)]
pub struct SkillRepository {
    root: PathBuf,
}

impl SkillRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate every package. Malformed descriptors are skipped and
    /// reported in `ScanResult::errors`.
    pub fn scan(&self) -> ScanResult {
        let mut result = ScanResult::default();
        if !self.root.is_dir() {
            debug!("Skills directory {:?} does not exist", self.root);
            return result;
        }

        for descriptor in self.descriptor_paths() {
            let Some(dir) = descriptor.parent() else {
                continue;
            };
            let Some(id) = self.id_for_dir(dir) else {
                warn!("Skipping skill package {:?}: path is not valid UTF-8", dir);
                result.errors.push(format!(
                    "{}: path is not valid UTF-8",
                    dir.strip_prefix(&self.root).unwrap_or(dir).display()
                ));
                continue;
            };

            match self.read_skill(&id, dir) {
                Ok(skill) => {
                    debug!("Found skill {}", skill.id);
                    result.skills.push(skill);
                }
                Err(e) => {
                    warn!("Skipping skill package {:?}: {}", dir, e);
                    result.errors.push(format!("{}: {}", id, e));
                }
            }
        }

        result
    }

    /// Whether the root holds at least one package.
    pub fn has_packages(&self) -> bool {
        self.root.is_dir() && !self.descriptor_paths().is_empty()
    }

    /// Load one skill from disk.
    pub fn get(&self, id: &str) -> SkillResult<Skill> {
        let dir = self.package_dir(id)?;
        self.read_skill(id, &dir)
    }

    /// Absolute package directory for `id`. Fails with `NotFound` if the id
    /// is malformed or has no descriptor.
    pub fn package_dir(&self, id: &str) -> SkillResult<PathBuf> {
        if !is_valid_id(id) {
            return Err(SkillError::not_found(id));
        }
        let dir = self.root.join(id);
        if !dir.join(DESCRIPTOR_FILE).is_file() {
            return Err(SkillError::not_found(id));
        }
        Ok(dir)
    }

    /// Map a changed path to the id of the package that owns it.
    ///
    /// A removed descriptor still maps to its package so the index can drop
    /// the entry.
    pub fn skill_from_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative
            .components()
            .any(|c| matches!(c, Component::Normal(name) if is_hidden_name(name)))
        {
            return None;
        }

        if path.file_name().is_some_and(|n| n == DESCRIPTOR_FILE) {
            return path.parent().and_then(|dir| self.id_for_dir(dir));
        }

        path.ancestors()
            .take_while(|dir| dir.starts_with(&self.root) && *dir != self.root.as_path())
            .find(|dir| dir.join(DESCRIPTOR_FILE).is_file())
            .and_then(|dir| self.id_for_dir(dir))
    }

    /// Files in a package other than its descriptor, relative and sorted.
    pub fn list_files(&self, id: &str) -> SkillResult<Vec<String>> {
        let dir = self.package_dir(id)?;
        let mut files = Vec::new();

        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking {:?}: {}", dir, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.depth() == 1 && entry.file_name() == DESCRIPTOR_FILE {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            match join_components(rel) {
                Some(file) => files.push(file),
                None => debug!("Skipping non UTF-8 file name {:?}", entry.path()),
            }
        }

        Ok(files)
    }

    /// Seed the built-in skills if the root holds no packages yet.
    pub fn seed_builtin(&self) -> SkillResult<Vec<PathBuf>> {
        if self.has_packages() {
            return Ok(Vec::new());
        }
        builtin::seed(&self.root)
    }

    fn descriptor_paths(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error walking skills directory: {}", e);
                    None
                }
            })
            .filter(|e| e.depth() > 1 && e.file_type().is_file() && e.file_name() == DESCRIPTOR_FILE)
            .map(DirEntry::into_path)
            .collect()
    }

    /// `None` when `dir` is outside the root or any component is not UTF-8,
    /// so two directories never share an id.
    fn id_for_dir(&self, dir: &Path) -> Option<String> {
        let rel = dir.strip_prefix(&self.root).ok()?;
        let id = join_components(rel)?;
        (!id.is_empty()).then_some(id)
    }

    fn read_skill(&self, id: &str, dir: &Path) -> SkillResult<Skill> {
        let path = dir.join(DESCRIPTOR_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SkillError::not_found(id));
            }
            Err(e) => {
                return Err(SkillError::InvalidDescriptor {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        let last_modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        parse_descriptor(id, dir, &raw, last_modified)
    }
}

/// Build a `Skill` from the raw text of its descriptor.
pub fn parse_descriptor(
    id: &str,
    dir: &Path,
    raw: &str,
    last_modified: Option<DateTime<Utc>>,
) -> SkillResult<Skill> {
    let path = dir.join(DESCRIPTOR_FILE);
    let invalid = |reason: String| SkillError::InvalidDescriptor {
        path: path.clone(),
        reason,
    };

    let (frontmatter, body) = split_frontmatter(raw).map_err(|r| invalid(r.to_string()))?;
    let fm: SkillFrontmatter =
        serde_yaml::from_str(frontmatter).map_err(|e| invalid(e.to_string()))?;

    if fm.description.trim().is_empty() {
        return Err(invalid("description is required".to_string()));
    }

    let title = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| id.to_string());

    Ok(Skill {
        id: id.to_string(),
        title,
        description: fm.description.trim().to_string(),
        content: body.trim().to_string(),
        source_path: dir.to_path_buf(),
        last_modified,
        content_hash: content_hash(raw),
        tags: fm.metadata.tags,
        category: fm.metadata.category,
    })
}

/// Split a descriptor into YAML front matter and body.
fn split_frontmatter(raw: &str) -> Result<(&str, &str), &'static str> {
    let content = raw.trim_start_matches('\u{feff}').trim_start();
    let rest = content
        .strip_prefix("---")
        .ok_or("SKILL.md must start with YAML front matter (---)")?;

    let end = rest
        .find("\n---")
        .ok_or("Missing closing --- for front matter")?;

    let frontmatter = rest[..end].trim();
    let after = &rest[end + 4..];
    // Drop the remainder of the closing delimiter line.
    let body = match after.find('\n') {
        Some(idx) => &after[idx + 1..],
        None => "",
    };
    Ok((frontmatter, body))
}

/// Hex SHA-256 of the descriptor text.
pub fn content_hash(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

/// Ids are relative paths made only of normal, non-hidden components.
pub(crate) fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains('\\')
        && Path::new(id).components().all(|c| match c {
            Component::Normal(name) => !is_hidden_name(name),
            _ => false,
        })
}

fn is_hidden(entry: &DirEntry) -> bool {
    is_hidden_name(entry.file_name())
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn join_components(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_skill;
    use tempfile::TempDir;

    #[test]
    fn test_parse_descriptor() {
        let raw = "---\nname: commit\ndescription: Create git commits\nmetadata:\n  tags: [git]\n---\n\n## Instructions\n\nUse conventional commits.\n";
        let skill = parse_descriptor("vcs/commit", Path::new("/skills/vcs/commit"), raw, None).unwrap();
        assert_eq!(skill.id, "vcs/commit");
        assert_eq!(skill.title, "commit");
        assert_eq!(skill.description, "Create git commits");
        assert_eq!(skill.content, "## Instructions\n\nUse conventional commits.");
        assert_eq!(skill.tags, vec!["git"]);
        assert_eq!(skill.content_hash, content_hash(raw));
    }

    #[test]
    fn test_parse_descriptor_title_falls_back_to_id() {
        let raw = "---\ndescription: No name here\n---\nBody";
        let skill = parse_descriptor("untitled", Path::new("/s/untitled"), raw, None).unwrap();
        assert_eq!(skill.title, "untitled");
        assert_eq!(skill.content, "Body");
    }

    #[test]
    fn test_parse_descriptor_rejects_malformed() {
        let dir = Path::new("/s/bad");
        assert!(parse_descriptor("bad", dir, "# no front matter", None).is_err());
        assert!(parse_descriptor("bad", dir, "---\nname: x\n", None).is_err());
        assert!(parse_descriptor("bad", dir, "---\nname: x\ndescription: \"\"\n---\n", None).is_err());
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("a").len(), 64);
    }

    #[test]
    fn test_scan_skips_malformed_and_hidden() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First", "Body");
        write_skill(tmp.path(), "group/beta", "beta", "Second", "Body");
        write_skill(tmp.path(), ".hidden", "hidden", "Hidden", "Body");
        let broken = tmp.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(DESCRIPTOR_FILE), "no front matter").unwrap();
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let repo = SkillRepository::new(tmp.path());
        let scan = repo.scan();
        let ids: Vec<_> = scan.skills.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "group/beta"]);
        assert!(scan.has_errors());
        assert_eq!(scan.errors.len(), 1);
        assert!(scan.errors[0].starts_with("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_non_utf8_package_dirs() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "tools", "tools", "Outer tools", "Body");
        let inner = tmp.path().join("tools").join(OsStr::from_bytes(b"\xffbin"));
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(
            inner.join(DESCRIPTOR_FILE),
            "---\nname: inner\ndescription: Inner tools\n---\nBody\n",
        )
        .unwrap();

        let repo = SkillRepository::new(tmp.path());
        let scan = repo.scan();
        let ids: Vec<_> = scan.skills.iter().map(|s| (s.id.as_str(), s.title.as_str())).collect();
        assert_eq!(ids, vec![("tools", "tools")]);
        assert_eq!(scan.errors.len(), 1);
        assert!(scan.errors[0].contains("not valid UTF-8"));
        assert!(repo.skill_from_path(&inner.join(DESCRIPTOR_FILE)).is_none());
        assert_eq!(repo.list_files("tools").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let repo = SkillRepository::new(tmp.path().join("nope"));
        assert!(repo.scan().skills.is_empty());
        assert!(!repo.has_packages());
    }

    #[test]
    fn test_get_and_not_found() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "Alpha", "First", "Body");
        let repo = SkillRepository::new(tmp.path());

        assert_eq!(repo.get("alpha").unwrap().title, "Alpha");
        assert!(matches!(repo.get("missing"), Err(SkillError::NotFound(_))));
        assert!(matches!(repo.get("../alpha"), Err(SkillError::NotFound(_))));
        assert!(matches!(repo.get("/alpha"), Err(SkillError::NotFound(_))));
    }

    #[test]
    fn test_skill_from_path() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "group/beta", "beta", "Second", "Body");
        std::fs::create_dir_all(tmp.path().join("group/beta/scripts")).unwrap();
        let repo = SkillRepository::new(tmp.path());

        let script = tmp.path().join("group/beta/scripts/run.sh");
        assert_eq!(repo.skill_from_path(&script).as_deref(), Some("group/beta"));

        let removed = tmp.path().join("gone").join(DESCRIPTOR_FILE);
        assert_eq!(repo.skill_from_path(&removed).as_deref(), Some("gone"));

        assert!(repo.skill_from_path(&tmp.path().join("loose.txt")).is_none());
        assert!(repo.skill_from_path(Path::new("/elsewhere/SKILL.md")).is_none());
    }

    #[test]
    fn test_list_files_excludes_descriptor() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "alpha", "alpha", "First", "Body");
        let dir = tmp.path().join("alpha");
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(dir.join("scripts/run.sh"), "echo").unwrap();
        std::fs::write(dir.join("README.md"), "readme").unwrap();

        let repo = SkillRepository::new(tmp.path());
        assert_eq!(
            repo.list_files("alpha").unwrap(),
            vec!["README.md", "scripts/run.sh"]
        );
    }

    #[test]
    fn test_seed_builtin_only_when_empty() {
        let tmp = TempDir::new().unwrap();
        let repo = SkillRepository::new(tmp.path());
        assert_eq!(repo.seed_builtin().unwrap().len(), builtin::BUILTIN_SKILLS.len());
        assert!(repo.get("hello-world").is_ok());

        let other = TempDir::new().unwrap();
        write_skill(other.path(), "mine", "mine", "Mine", "Body");
        let repo = SkillRepository::new(other.path());
        assert!(repo.seed_builtin().unwrap().is_empty());
        assert!(repo.get("hello-world").is_err());
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("alpha"));
        assert!(is_valid_id("group/beta"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id(".."));
        assert!(!is_valid_id("a/../b"));
        assert!(!is_valid_id("./a"));
        assert!(!is_valid_id(".git"));
        assert!(!is_valid_id("a\\b"));
    }
}

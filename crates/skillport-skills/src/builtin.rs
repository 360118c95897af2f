//! Skills compiled into the binary and seeded into an empty skills directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::SkillResult;
use crate::repository::DESCRIPTOR_FILE;

/// A built-in skill: its id and the full `SKILL.md` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinSkill {
    pub id: &'static str,
    pub descriptor: &'static str,
}

/// All built-in skills, keyed by id.
pub const BUILTIN_SKILLS: &[BuiltinSkill] = &[
    BuiltinSkill {
        id: "hello-world",
        descriptor: include_str!("../builtin/hello-world/SKILL.md"),
    },
    BuiltinSkill {
        id: "skill-template",
        descriptor: include_str!("../builtin/skill-template/SKILL.md"),
    },
];

/// Look up a built-in skill by id.
pub fn get(id: &str) -> Option<&'static BuiltinSkill> {
    BUILTIN_SKILLS.iter().find(|s| s.id == id)
}

/// Write every built-in skill under `root`, skipping any descriptor that
/// already exists. Returns the paths that were written.
pub fn seed(root: &Path) -> SkillResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for skill in BUILTIN_SKILLS {
        let dir = root.join(skill.id);
        let path = dir.join(DESCRIPTOR_FILE);
        if path.exists() {
            debug!("Built-in skill {} already present", skill.id);
            continue;
        }
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&path, skill.descriptor)?;
        written.push(path);
    }

    if !written.is_empty() {
        info!("Seeded {} built-in skill(s) into {:?}", written.len(), root);
    }
    Ok(written)
}

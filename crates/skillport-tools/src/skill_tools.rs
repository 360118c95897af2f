//! Skill tools: search the index, load a skill, read a file from a package.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use skillport_core::error::SkillportError;
use skillport_core::tool_registry::Tool;
use skillport_skills::{FileContent, SearchService, SkillError, SkillLoader};
use tracing::debug;

/// Default number of results for `search_skills`.
pub const DEFAULT_SEARCH_LIMIT: i64 = 5;

/// Largest accepted `limit`.
pub const MAX_SEARCH_LIMIT: i64 = 100;

/// Services the skill tools run against.
#[derive(Clone)]
pub struct SkillContext {
    pub search: SearchService,
    pub loader: SkillLoader,
}

impl SkillContext {
    pub fn new(search: SearchService, loader: SkillLoader) -> Arc<Self> {
        Arc::new(Self { search, loader })
    }
}

fn exec_err(tool_name: &str, msg: impl Into<String>) -> SkillportError {
    SkillportError::ToolExecution {
        tool_name: tool_name.into(),
        message: msg.into(),
    }
}

fn arg_err(tool_name: &str, msg: impl Into<String>) -> SkillportError {
    SkillportError::InvalidArguments {
        tool_name: tool_name.into(),
        message: msg.into(),
    }
}

fn required_str<'a>(args: &'a Value, tool_name: &str, key: &str) -> Result<&'a str, SkillportError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| arg_err(tool_name, format!("Missing '{}' parameter", key)))
}

fn starts_with_h1(text: &str) -> bool {
    text.trim_start().starts_with("# ")
}

fn skill_err(tool_name: &str, e: SkillError) -> SkillportError {
    match e {
        SkillError::Embedding(e) => SkillportError::Embedding(e),
        other => exec_err(tool_name, other.to_string()),
    }
}

// ── search_skills ───────────────────────────────────────────────────────

/// Finds skills relevant to a natural-language query.
pub struct SearchSkillsTool {
    ctx: Arc<SkillContext>,
}

impl SearchSkillsTool {
    pub const NAME: &'static str = "search_skills";

    pub fn new(ctx: Arc<SkillContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SearchSkillsTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search available skills by natural-language query. Returns skill ids ranked by relevance; pass an id to load_skill to get the full instructions."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What you need help with"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, SkillportError> {
        let query = required_str(&args, Self::NAME, "query")?;
        let limit = match args.get("limit") {
            None | Some(Value::Null) => DEFAULT_SEARCH_LIMIT,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| arg_err(Self::NAME, "'limit' must be an integer"))?,
        };
        let limit = limit.clamp(0, MAX_SEARCH_LIMIT) as usize;

        let results = self.ctx.search.search(query, limit).await?;
        debug!(
            "search_skills '{}' -> {} of {} match(es)",
            query,
            results.len(),
            results.total_matches
        );

        if results.is_empty() {
            return Ok(format!("No skills found matching '{}'.", query));
        }

        let mut output = format!("Found {} skill(s) matching '{}':\n\n", results.len(), query);

        for result in &results.results {
            output.push_str(&format!(
                "- **{}** (score: {:.3}, {}): {}",
                result.id,
                result.score,
                result.match_kind.as_str(),
                result.title
            ));
            output.push_str(&format!("\n  {}", result.description));
            if let Some(snippet) = result.snippet.as_ref().filter(|s| **s != result.description) {
                output.push_str(&format!("\n  > {}", snippet));
            }
            output.push('\n');
        }

        if results.truncated {
            output.push_str(&format!(
                "\n({} total matches, showing top {})",
                results.total_matches,
                results.len()
            ));
        }
        if results.lexical_only {
            output.push_str("\n(full-text ranking only)");
        }

        Ok(output)
    }
}

// ── load_skill ──────────────────────────────────────────────────────────

/// Returns the full instructions of one skill.
pub struct LoadSkillTool {
    ctx: Arc<SkillContext>,
}

impl LoadSkillTool {
    pub const NAME: &'static str = "load_skill";

    pub fn new(ctx: Arc<SkillContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for LoadSkillTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Load the full instructions of a skill by id, as returned by search_skills."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {
                    "type": "string",
                    "description": "Skill id from search_skills"
                }
            },
            "required": ["skill_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, SkillportError> {
        let skill_id = required_str(&args, Self::NAME, "skill_id")?;
        let content = self
            .ctx
            .loader
            .load(skill_id)
            .await
            .map_err(|e| skill_err(Self::NAME, e))?;

        // Bodies usually open with their own H1; only add one when missing.
        let mut output = if starts_with_h1(&content.instructions) {
            content.instructions.clone()
        } else {
            format!("# {}\n\n{}", content.title, content.instructions)
        };
        output.push_str(&format!("\n\n---\n**Skill directory:** {}", content.path.display()));
        if !content.files.is_empty() {
            output.push_str("\n**Files:** ");
            output.push_str(&content.files.join(", "));
        }
        Ok(output)
    }
}

// ── read_skill_file ─────────────────────────────────────────────────────

/// Reads a file inside a skill package.
pub struct ReadSkillFileTool {
    ctx: Arc<SkillContext>,
}

impl ReadSkillFileTool {
    pub const NAME: &'static str = "read_skill_file";

    pub fn new(ctx: Arc<SkillContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ReadSkillFileTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Read a file bundled with a skill (scripts, templates, references). Paths are relative to the skill directory."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {
                    "type": "string",
                    "description": "Skill id from search_skills"
                },
                "path": {
                    "type": "string",
                    "description": "File path relative to the skill directory"
                }
            },
            "required": ["skill_id", "path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, SkillportError> {
        let skill_id = required_str(&args, Self::NAME, "skill_id")?;
        let path = required_str(&args, Self::NAME, "path")?;

        let file = self
            .ctx
            .loader
            .read_file(skill_id, path)
            .await
            .map_err(|e| skill_err(Self::NAME, e))?;
        debug!("read_skill_file {}/{} ({} bytes)", skill_id, path, file.content.len());

        Ok(match file.content {
            FileContent::Text(text) => text,
            FileContent::Binary(bytes) => format!(
                "[binary file: {}, {} bytes, base64]\n{}",
                file.path,
                bytes.len(),
                base64::engine::general_purpose::STANDARD.encode(&bytes)
            ),
        })
    }
}

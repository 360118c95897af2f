//! Reading and in-place editing of dotenv-style `KEY=value` files.
//!
//! Used at startup to pick up persisted embedding settings and by the
//! `set-embedding` command to write them.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::{
    ConfigError, Field, ProviderKind, DEFAULT_DASHSCOPE_BASE_URL, DEFAULT_DASHSCOPE_MODEL,
    DEFAULT_LOCAL_BASE_URL, DEFAULT_LOCAL_MODEL, ENV_API_KEY, ENV_BASE_URL,
    ENV_DASHSCOPE_API_KEY, ENV_MODEL, ENV_OPENAI_API_KEY, ENV_OPENAI_MODEL, ENV_PROVIDER,
};

fn env_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9_]+)\s*=").expect("valid env line regex"))
}

/// Quote a value if it contains a space, `#`, or `"`.
pub fn format_env_value(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ' ' | '#' | '"')) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn parse_env_value(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return raw[1..raw.len() - 1].replace("\\\"", "\"");
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    // Unquoted values may carry a trailing comment.
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Parse `KEY=value` lines. Comments and unrecognized lines are ignored.
pub fn read_env_file(path: &Path) -> std::io::Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)?;
    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some(caps) = env_line_re().captures(line) {
            let key = caps[1].to_string();
            let value = parse_env_value(&line[caps[0].len()..]);
            vars.insert(key, value);
        }
    }
    Ok(vars)
}

/// Rewrite `path` in place: replace lines for keys in `updates`, drop lines
/// for keys in `removals`, append keys not yet present. Everything else,
/// including comments and blank lines, is preserved.
pub fn update_env_file(
    path: &Path,
    updates: &[(String, String)],
    removals: &HashSet<String>,
) -> std::io::Result<()> {
    let mut lines: Vec<String> = Vec::new();
    let mut remaining: Vec<&(String, String)> = updates.iter().collect();

    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        for line in raw.split_inclusive('\n') {
            let key = env_line_re()
                .captures(line.trim())
                .map(|caps| caps[1].to_string());

            let Some(key) = key else {
                lines.push(line.to_string());
                continue;
            };

            if removals.contains(&key) {
                continue;
            }

            match remaining.iter().position(|(k, _)| *k == key) {
                Some(idx) => {
                    let (k, v) = remaining.remove(idx);
                    lines.push(format!("{}={}\n", k, format_env_value(v)));
                }
                None => lines.push(line.to_string()),
            }
        }
    }

    if !remaining.is_empty() {
        if let Some(last) = lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
        for (k, v) in remaining {
            lines.push(format!("{}={}\n", k, format_env_value(v)));
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, lines.concat())
}

/// Keys to write and keys to remove when switching the embedding provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingEnvUpdate {
    pub updates: Vec<(String, String)>,
    pub removals: HashSet<String>,
}

impl EmbeddingEnvUpdate {
    /// Build the env-file edit for `provider`, filling provider defaults
    /// where they exist and rejecting missing required values.
    pub fn for_provider(
        provider: ProviderKind,
        base_url: Option<&str>,
        model: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut plan = Self::default();
        plan.set(ENV_PROVIDER, provider.as_str());

        match provider {
            ProviderKind::None => {
                plan.removals.extend(
                    [
                        ENV_BASE_URL,
                        ENV_MODEL,
                        ENV_API_KEY,
                        ENV_OPENAI_API_KEY,
                        ENV_OPENAI_MODEL,
                    ]
                    .map(String::from),
                );
            }
            ProviderKind::Local => {
                plan.set(ENV_BASE_URL, base_url.unwrap_or(DEFAULT_LOCAL_BASE_URL));
                plan.set(ENV_MODEL, model.unwrap_or(DEFAULT_LOCAL_MODEL));
                plan.removals.insert(ENV_API_KEY.to_string());
            }
            ProviderKind::OpenAi => {
                if let Some(model) = model {
                    plan.set(ENV_OPENAI_MODEL, model);
                }
                if let Some(key) = api_key {
                    plan.set(ENV_OPENAI_API_KEY, key);
                }
            }
            ProviderKind::DashScope => {
                plan.set(ENV_BASE_URL, base_url.unwrap_or(DEFAULT_DASHSCOPE_BASE_URL));
                plan.set(ENV_MODEL, model.unwrap_or(DEFAULT_DASHSCOPE_MODEL));
                if let Some(key) = api_key {
                    plan.set(ENV_DASHSCOPE_API_KEY, key);
                }
            }
            ProviderKind::OpenAiCompatible
            | ProviderKind::Zhipu
            | ProviderKind::Baidu
            | ProviderKind::Tencent => {
                let base_url = require(provider, Field::BaseUrl, base_url)?;
                let model = require(provider, Field::Model, model)?;
                plan.set(ENV_BASE_URL, base_url);
                plan.set(ENV_MODEL, model);
                if let Some(key) = api_key {
                    plan.set(ENV_API_KEY, key);
                }
            }
        }

        Ok(plan)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.updates.push((key.to_string(), value.to_string()));
    }

    /// Apply to an env file.
    pub fn apply(&self, path: &Path) -> std::io::Result<()> {
        update_env_file(path, &self.updates, &self.removals)
    }
}

fn require<'a>(
    provider: ProviderKind,
    field: Field,
    value: Option<&'a str>,
) -> Result<&'a str, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingField {
            provider,
            field,
            env_var: provider.env_var_for(field),
        })
}

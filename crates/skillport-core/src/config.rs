use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::envfile;

pub const ENV_PROVIDER: &str = "SKILLPORT_EMBEDDING_PROVIDER";
pub const ENV_BASE_URL: &str = "SKILLPORT_EMBEDDING_BASE_URL";
pub const ENV_MODEL: &str = "SKILLPORT_EMBEDDING_MODEL";
pub const ENV_API_KEY: &str = "SKILLPORT_EMBEDDING_API_KEY";
pub const ENV_TIMEOUT: &str = "SKILLPORT_EMBEDDING_TIMEOUT_SECS";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "OPENAI_EMBEDDING_MODEL";
pub const ENV_DASHSCOPE_API_KEY: &str = "DASHSCOPE_API_KEY";
pub const ENV_SKILLS_DIR: &str = "SKILLPORT_SKILLS_DIR";
pub const ENV_DB_PATH: &str = "SKILLPORT_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "SKILLPORT_LOG_LEVEL";

pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_LOCAL_MODEL: &str = "bge-m3";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_DASHSCOPE_MODEL: &str = "text-embedding-v3";
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

// ── Provider table ──────────────────────────────────────────────────────

/// Embedding backend family selected by `SKILLPORT_EMBEDDING_PROVIDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    #[serde(rename = "dashscope")]
    DashScope,
    #[serde(rename = "zhipu")]
    Zhipu,
    #[serde(rename = "baidu")]
    Baidu,
    #[serde(rename = "tencent")]
    Tencent,
}

/// A configuration field that a provider may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BaseUrl,
    Model,
    ApiKey,
}

/// What the embedding provider does when its backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and return no vector; search continues lexical-only.
    Degrade,
    /// Surface the error to the caller.
    Propagate,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 8] = [
        ProviderKind::None,
        ProviderKind::Local,
        ProviderKind::OpenAi,
        ProviderKind::OpenAiCompatible,
        ProviderKind::DashScope,
        ProviderKind::Zhipu,
        ProviderKind::Baidu,
        ProviderKind::Tencent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::None => "none",
            ProviderKind::Local => "local",
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::DashScope => "dashscope",
            ProviderKind::Zhipu => "zhipu",
            ProviderKind::Baidu => "baidu",
            ProviderKind::Tencent => "tencent",
        }
    }

    /// Fields that must be present after defaults are applied.
    pub fn required_fields(self) -> &'static [Field] {
        match self {
            ProviderKind::None | ProviderKind::Local => &[],
            ProviderKind::OpenAi => &[Field::ApiKey],
            ProviderKind::OpenAiCompatible
            | ProviderKind::DashScope
            | ProviderKind::Zhipu
            | ProviderKind::Baidu
            | ProviderKind::Tencent => &[Field::BaseUrl, Field::Model],
        }
    }

    /// Only `local` is treated as best-effort.
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            ProviderKind::Local => FailurePolicy::Degrade,
            _ => FailurePolicy::Propagate,
        }
    }

    /// Environment variable a user should set to supply `field`.
    pub fn env_var_for(self, field: Field) -> &'static str {
        match (self, field) {
            (_, Field::BaseUrl) => ENV_BASE_URL,
            (ProviderKind::OpenAi, Field::Model) => ENV_OPENAI_MODEL,
            (_, Field::Model) => ENV_MODEL,
            (ProviderKind::OpenAi, Field::ApiKey) => ENV_OPENAI_API_KEY,
            (_, Field::ApiKey) => ENV_API_KEY,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| ConfigError::UnknownProvider(s.to_string()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::BaseUrl => "base_url",
            Field::Model => "model",
            Field::ApiKey => "api_key",
        })
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Embedding provider '{provider}' requires {field} (set {env_var})")]
    MissingField {
        provider: ProviderKind,
        field: Field,
        env_var: &'static str,
    },

    #[error("Unsupported embedding provider '{0}' (expected one of: none, local, openai, openai_compatible, dashscope, zhipu, baidu, tencent)")]
    UnknownProvider(String),

    #[error("Invalid embedding base URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ── Raw settings ────────────────────────────────────────────────────────

/// Raw, unvalidated settings gathered from the config file, `.env`, and
/// the process environment. Call [`Settings::validate`] before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub skills_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub dashscope_api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// Gather settings: config file (explicit path, else the default path if
    /// present), then the env file, then the process environment.
    pub fn load(config_path: Option<&Path>, env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match config_path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(path) = env_file.filter(|p| p.exists()) {
            let vars = envfile::read_env_file(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            settings.apply_env(|key| vars.get(key).cloned());
        }

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from a variable lookup. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let e = &mut self.embedding;
        if let Some(v) = get(ENV_PROVIDER) {
            e.provider = Some(v);
        }
        if let Some(v) = get(ENV_BASE_URL) {
            e.base_url = Some(v);
        }
        if let Some(v) = get(ENV_MODEL) {
            e.model = Some(v);
        }
        if let Some(v) = get(ENV_API_KEY) {
            e.api_key = Some(v);
        }
        if let Some(v) = get(ENV_OPENAI_API_KEY) {
            e.openai_api_key = Some(v);
        }
        if let Some(v) = get(ENV_OPENAI_MODEL) {
            e.openai_model = Some(v);
        }
        if let Some(v) = get(ENV_DASHSCOPE_API_KEY) {
            e.dashscope_api_key = Some(v);
        }
        if let Some(v) = get(ENV_TIMEOUT).and_then(|v| v.trim().parse().ok()) {
            e.timeout_secs = Some(v);
        }
        if let Some(v) = get(ENV_SKILLS_DIR) {
            self.skills_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_LOG_LEVEL) {
            self.log_level = Some(v);
        }
    }

    /// Validate everything up front. Nothing downstream accepts raw settings.
    pub fn validate(&self) -> Result<Config, ConfigError> {
        let embedding = EmbeddingConfig::validate(&self.embedding)?;
        let base = Self::data_dir();
        Ok(Config {
            embedding,
            skills_dir: self
                .skills_dir
                .clone()
                .unwrap_or_else(|| base.join("skills")),
            index_path: self
                .db_path
                .clone()
                .unwrap_or_else(|| base.join("index.json")),
            server: self.server.clone(),
        })
    }

    /// Default config file path (~/.config/skillport/config.toml).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skillport")
            .join("config.toml")
    }

    /// Data directory for skills and the index (~/.skillport).
    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skillport")
    }
}

// ── Validated configuration ─────────────────────────────────────────────

/// Validated configuration. Only obtainable through [`Settings::validate`].
#[derive(Debug, Clone)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub skills_dir: PathBuf,
    pub index_path: PathBuf,
    pub server: ServerConfig,
}

/// Validated embedding settings: every field required by `provider` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    provider: ProviderKind,
    base_url: Option<Url>,
    model: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl EmbeddingConfig {
    /// Provider `none`: always valid.
    pub fn disabled() -> Self {
        Self {
            provider: ProviderKind::None,
            base_url: None,
            model: None,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_EMBEDDING_TIMEOUT_SECS),
        }
    }

    pub fn validate(raw: &EmbeddingSettings) -> Result<Self, ConfigError> {
        let provider: ProviderKind = non_empty(&raw.provider).unwrap_or("none").parse()?;
        let timeout = Duration::from_secs(raw.timeout_secs.unwrap_or(DEFAULT_EMBEDDING_TIMEOUT_SECS));

        let base_url = non_empty(&raw.base_url);
        let model = non_empty(&raw.model);
        let api_key = non_empty(&raw.api_key);

        let (base_url, model, api_key) = match provider {
            ProviderKind::None => return Ok(Self::disabled()),
            ProviderKind::Local => (
                Some(base_url.unwrap_or(DEFAULT_LOCAL_BASE_URL)),
                Some(model.unwrap_or(DEFAULT_LOCAL_MODEL)),
                api_key,
            ),
            ProviderKind::OpenAi => (
                None,
                Some(
                    non_empty(&raw.openai_model)
                        .or(model)
                        .unwrap_or(DEFAULT_OPENAI_MODEL),
                ),
                non_empty(&raw.openai_api_key).or(api_key),
            ),
            ProviderKind::DashScope => (
                base_url,
                model,
                api_key.or(non_empty(&raw.dashscope_api_key)),
            ),
            ProviderKind::OpenAiCompatible
            | ProviderKind::Zhipu
            | ProviderKind::Baidu
            | ProviderKind::Tencent => (base_url, model, api_key),
        };

        for &field in provider.required_fields() {
            let present = match field {
                Field::BaseUrl => base_url.is_some(),
                Field::Model => model.is_some(),
                Field::ApiKey => api_key.is_some(),
            };
            if !present {
                return Err(ConfigError::MissingField {
                    provider,
                    field,
                    env_var: provider.env_var_for(field),
                });
            }
        }

        let base_url = base_url.map(parse_base_url).transpose()?;

        Ok(Self {
            provider,
            base_url,
            model: model.map(str::to_string),
            api_key: api_key.map(str::to_string),
            timeout,
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Bearer token for authentication (None = no auth).
    pub auth_token: Option<String>,
    /// Enable CORS.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            auth_token: None,
            cors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn embedding(provider: &str) -> EmbeddingSettings {
        EmbeddingSettings {
            provider: Some(provider.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_none_needs_nothing() {
        let config = EmbeddingConfig::validate(&EmbeddingSettings::default()).unwrap();
        assert_eq!(config.provider(), ProviderKind::None);
        assert!(config.model().is_none());
    }

    #[test]
    fn test_openai_requires_key() {
        let err = EmbeddingConfig::validate(&embedding("openai")).unwrap_err();
        match err {
            ConfigError::MissingField {
                provider, field, env_var,
            } => {
                assert_eq!(provider, ProviderKind::OpenAi);
                assert_eq!(field, Field::ApiKey);
                assert_eq!(env_var, ENV_OPENAI_API_KEY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_openai_with_key_uses_default_model() {
        let mut raw = embedding("openai");
        raw.openai_api_key = Some("sk-test".into());
        let config = EmbeddingConfig::validate(&raw).unwrap();
        assert_eq!(config.api_key(), Some("sk-test"));
        assert_eq!(config.model(), Some(DEFAULT_OPENAI_MODEL));
        assert!(config.base_url().is_none());
    }

    #[test]
    fn test_openai_compatible_requires_base_url() {
        let mut raw = embedding("openai_compatible");
        raw.model = Some("test-model".into());
        raw.api_key = Some("sk-test-key".into());
        let err = EmbeddingConfig::validate(&raw).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: Field::BaseUrl, .. }
        ));
    }

    #[test]
    fn test_compatible_family_requires_model() {
        for tag in ["openai_compatible", "dashscope", "zhipu", "baidu", "tencent"] {
            let mut raw = embedding(tag);
            raw.base_url = Some("https://example.com/v1".into());
            let err = EmbeddingConfig::validate(&raw).unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingField { field: Field::Model, .. }),
                "{tag} should require a model"
            );
        }
    }

    #[test]
    fn test_required_fields_suffice_regardless_of_optional() {
        for provider in ProviderKind::ALL {
            let mut raw = embedding(provider.as_str());
            for field in provider.required_fields() {
                match field {
                    Field::BaseUrl => raw.base_url = Some("http://127.0.0.1:9/v1".into()),
                    Field::Model => raw.model = Some("m".into()),
                    Field::ApiKey => raw.openai_api_key = Some("k".into()),
                }
            }
            let config = EmbeddingConfig::validate(&raw)
                .unwrap_or_else(|e| panic!("{provider} should validate: {e}"));
            assert_eq!(config.provider(), provider);
        }
    }

    #[test]
    fn test_local_defaults() {
        let config = EmbeddingConfig::validate(&embedding("local")).unwrap();
        assert_eq!(config.base_url().unwrap().as_str(), DEFAULT_LOCAL_BASE_URL);
        assert_eq!(config.model(), Some(DEFAULT_LOCAL_MODEL));
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut raw = embedding("zhipu");
        raw.base_url = Some("   ".into());
        raw.model = Some("embedding-3".into());
        assert!(EmbeddingConfig::validate(&raw).is_err());
    }

    #[test]
    fn test_dashscope_key_fallback() {
        let mut raw = embedding("dashscope");
        raw.base_url = Some(DEFAULT_DASHSCOPE_BASE_URL.into());
        raw.model = Some(DEFAULT_DASHSCOPE_MODEL.into());
        raw.dashscope_api_key = Some("ds-key".into());
        let config = EmbeddingConfig::validate(&raw).unwrap();
        assert_eq!(config.api_key(), Some("ds-key"));
    }

    #[test]
    fn test_unknown_provider() {
        let err = EmbeddingConfig::validate(&embedding("cohere")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(ref p) if p == "cohere"));
    }

    #[test]
    fn test_provider_tag_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_invalid_base_url() {
        let mut raw = embedding("openai_compatible");
        raw.base_url = Some("not a url".into());
        raw.model = Some("m".into());
        assert!(matches!(
            EmbeddingConfig::validate(&raw).unwrap_err(),
            ConfigError::InvalidUrl { .. }
        ));

        raw.base_url = Some("ftp://example.com".into());
        assert!(matches!(
            EmbeddingConfig::validate(&raw).unwrap_err(),
            ConfigError::InvalidUrl { .. }
        ));
    }

    #[test]
    fn test_failure_policy_only_local_degrades() {
        for provider in ProviderKind::ALL {
            let expected = if provider == ProviderKind::Local {
                FailurePolicy::Degrade
            } else {
                FailurePolicy::Propagate
            };
            assert_eq!(provider.failure_policy(), expected);
        }
    }

    #[test]
    fn test_apply_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_PROVIDER, "tencent"),
            (ENV_BASE_URL, "https://tencent.example/v1"),
            (ENV_MODEL, "hunyuan-embedding"),
            (ENV_SKILLS_DIR, "/tmp/skills"),
            (ENV_TIMEOUT, "5"),
            (ENV_API_KEY, ""),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.embedding.api_key = Some("from-file".into());
        settings.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.embedding.provider.as_deref(), Some("tencent"));
        assert_eq!(settings.embedding.timeout_secs, Some(5));
        // Blank env values do not clobber existing settings.
        assert_eq!(settings.embedding.api_key.as_deref(), Some("from-file"));

        let config = settings.validate().unwrap();
        assert_eq!(config.skills_dir, PathBuf::from("/tmp/skills"));
        assert_eq!(config.embedding.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
skills_dir = "/srv/skills"

[embedding]
provider = "local"
model = "nomic-embed-text"

[server]
port = 9100
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        let config = settings.validate().unwrap();
        assert_eq!(config.embedding.model(), Some("nomic-embed-text"));
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.skills_dir, PathBuf::from("/srv/skills"));
    }

    #[test]
    fn test_load_reads_env_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "").unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "SKILLPORT_DB_PATH=\"/data/my index.json\"\n").unwrap();

        let settings = Settings::load(Some(&config_path), Some(&env_path)).unwrap();
        // The process environment may override, but only if it sets the key.
        if std::env::var(ENV_DB_PATH).is_err() {
            assert_eq!(settings.db_path, Some(PathBuf::from("/data/my index.json")));
        }
    }
}

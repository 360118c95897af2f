//! Embedding provider with per-backend failure policy.
//!
//! Every network-backed provider speaks the OpenAI `/embeddings` wire
//! format. `none` never calls out. `local` degrades to "no vector" on
//! failure so search falls back to full-text; every other provider
//! surfaces the error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, FailurePolicy, ProviderKind};

/// Sent when a self-hosted endpoint is configured without a key; some
/// compatible servers reject requests that carry no key at all.
pub const PLACEHOLDER_API_KEY: &str = "sk-local";

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request to '{provider}' failed: {message}")]
    Request {
        provider: ProviderKind,
        message: String,
    },

    #[error("Embedding request to '{provider}' timed out after {after:?}")]
    Timeout {
        provider: ProviderKind,
        after: Duration,
    },

    #[error("Embedding response from '{provider}' contained no vector")]
    EmptyResponse { provider: ProviderKind },

    #[error("Failed to build embedding client: {0}")]
    Client(String),
}

/// A backend that turns one piece of text into one vector.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

// ── OpenAI-wire backend ─────────────────────────────────────────────────

/// Backend for OpenAI and every OpenAI-compatible endpoint.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    provider: ProviderKind,
}

impl OpenAiBackend {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let mut openai_config = OpenAIConfig::new();

        if let Some(base_url) = config.base_url() {
            openai_config = openai_config.with_api_base(base_url.as_str().trim_end_matches('/'));
        }

        let api_key = match (config.api_key(), config.base_url()) {
            (Some(key), _) => Some(key.to_string()),
            (None, Some(_)) => Some(PLACEHOLDER_API_KEY.to_string()),
            (None, None) => None,
        };
        if let Some(key) = api_key {
            openai_config = openai_config.with_api_key(key);
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::Client(e.to_string()))?;

        let client = Client::with_config(openai_config).with_http_client(http_client);

        Ok(Self {
            client,
            model: config.model().unwrap_or_default().to_string(),
            provider: config.provider(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(vec![text.to_string()]))
            .build()
            .map_err(|e| EmbeddingError::Request {
                provider: self.provider,
                message: e.to_string(),
            })?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Request {
                provider: self.provider,
                message: e.to_string(),
            })?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::EmptyResponse {
                provider: self.provider,
            })
    }
}

// ── Provider ────────────────────────────────────────────────────────────

/// The embedding capability shared by the index and the retrieval engine.
///
/// Stateless between calls; clone or wrap in `Arc` freely.
#[derive(Clone)]
pub struct EmbeddingProvider {
    kind: ProviderKind,
    model: Option<String>,
    timeout: Duration,
    backend: Option<Arc<dyn EmbeddingBackend>>,
}

impl EmbeddingProvider {
    /// Build the provider for a validated configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let backend: Option<Arc<dyn EmbeddingBackend>> = match config.provider() {
            ProviderKind::None => None,
            _ => Some(Arc::new(OpenAiBackend::from_config(config)?)),
        };
        Ok(Self {
            kind: config.provider(),
            model: config.model().map(str::to_string),
            timeout: config.timeout(),
            backend,
        })
    }

    /// Provider `none`.
    pub fn disabled() -> Self {
        Self {
            kind: ProviderKind::None,
            model: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_EMBEDDING_TIMEOUT_SECS),
            backend: None,
        }
    }

    /// Use a custom backend under the failure policy of `kind`.
    pub fn with_backend(
        kind: ProviderKind,
        model: impl Into<String>,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            kind,
            model: Some(model.into()),
            timeout: Duration::from_secs(crate::config::DEFAULT_EMBEDDING_TIMEOUT_SECS),
            backend: Some(backend),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.kind != ProviderKind::None && self.backend.is_some()
    }

    /// Identifies the generation of vectors this provider produces.
    pub fn fingerprint(&self) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        Some(format!(
            "{}:{}",
            self.kind,
            self.model.as_deref().unwrap_or_default()
        ))
    }

    /// Embed `text`. `Ok(None)` means "no vector": provider `none`, or a
    /// degraded failure under the `local` policy.
    pub async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if self.kind == ProviderKind::None {
            return Ok(None);
        }
        let Some(backend) = &self.backend else {
            return Ok(None);
        };

        let text = normalize_input(text);
        let result = match tokio::time::timeout(self.timeout, backend.embed(&text)).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout {
                provider: self.kind,
                after: self.timeout,
            }),
        };

        match result {
            Ok(vector) => {
                debug!("Embedded {} chars -> {} dims ({})", text.len(), vector.len(), self.kind);
                Ok(Some(vector))
            }
            Err(e) => {
                warn!("Embedding error ({}): {}", self.kind, e);
                match self.kind.failure_policy() {
                    FailurePolicy::Degrade => {
                        warn!("Local embeddings unavailable; falling back to full-text search.");
                        Ok(None)
                    }
                    FailurePolicy::Propagate => Err(e),
                }
            }
        }
    }
}

impl fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Newlines are flattened to spaces before embedding.
pub fn normalize_input(text: &str) -> String {
    text.replace(|c: char| c == '\r' || c == '\n', " ")
}

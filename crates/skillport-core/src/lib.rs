//! Core building blocks for skillport: fail-fast configuration, the
//! embedding provider, the error taxonomy, and the tool registry that the
//! transports dispatch through.

pub mod config;
pub mod embedding;
pub mod envfile;
pub mod error;
pub mod tool_registry;
pub mod types;

pub use config::{
    Config, ConfigError, EmbeddingConfig, EmbeddingSettings, FailurePolicy, ProviderKind,
    ServerConfig, Settings,
};
pub use embedding::{EmbeddingBackend, EmbeddingError, EmbeddingProvider};
pub use error::SkillportError;
pub use tool_registry::{Tool, ToolRegistry};
pub use types::{ContentBlock, ToolOutput, ToolSchema};

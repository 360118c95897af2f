use skillport_core::config::ServerConfig;
use skillport_core::tool_registry::ToolRegistry;
use skillport_skills::SkillIndex;
use std::sync::Arc;

/// Shared application state for the HTTP transport.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub tool_registry: Arc<ToolRegistry>,
    pub index: Arc<SkillIndex>,
}

impl AppState {
    pub fn new(config: ServerConfig, tool_registry: Arc<ToolRegistry>, index: Arc<SkillIndex>) -> Self {
        Self {
            config,
            tool_registry,
            index,
        }
    }
}

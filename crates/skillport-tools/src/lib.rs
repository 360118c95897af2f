//! Tools exposed to agents over the skillport transports.

pub mod skill_tools;

use std::sync::Arc;

use skillport_core::tool_registry::ToolRegistry;

pub use skill_tools::{LoadSkillTool, ReadSkillFileTool, SearchSkillsTool, SkillContext};

/// Which transport the registry is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Local pipe (JSON lines over stdin/stdout).
    Stdio,
    /// Networked HTTP transport.
    Http,
}

/// Register the skill tools available on `transport`. `read_skill_file` is
/// only offered over HTTP; a local agent can read package files directly.
pub fn register_all(registry: &mut ToolRegistry, ctx: Arc<SkillContext>, transport: Transport) {
    registry.register(Arc::new(SearchSkillsTool::new(ctx.clone())));
    registry.register(Arc::new(LoadSkillTool::new(ctx.clone())));
    if transport == Transport::Http {
        registry.register(Arc::new(ReadSkillFileTool::new(ctx)));
    }
}

/// A registry holding the tools for `transport`.
pub fn registry_for(ctx: Arc<SkillContext>, transport: Transport) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_all(&mut registry, ctx, transport);
    registry
}

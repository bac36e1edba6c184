//! Built-in tools for the Ema agent.
//!
//! The reply tool is always registered; the rest are gated by the
//! `tools.*` configuration booleans.

pub mod memory_search;
pub mod remember;
pub mod reply;

pub use memory_search::MemorySearchTool;
pub use remember::RememberTool;
pub use reply::ReplyTool;

use ema_config::ToolsConfig;
use ema_core::ToolRegistry;

/// Assemble the tool registry for one server according to configuration.
pub fn build_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReplyTool));
    if config.memory_search {
        registry.register(Box::new(MemorySearchTool));
    }
    if config.remember {
        registry.register(Box::new(RememberTool));
    }
    registry
}

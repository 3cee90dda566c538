//! The Tool Facade (C11): a JSON-RPC 2.0 boundary over stdio, MCP-shaped
//! request/response envelopes, matching the teacher's own MCP dispatch
//! pattern generalized from code-search tools to catalog/rule/source tools.

mod protocol;
mod tools;

use std::sync::Arc;

pub use protocol::{dispatch_jsonrpc, run_mcp, McpContext};
pub use tools::{tool_definitions, ToolContext};

/// Convenience constructor so the binary crate doesn't need to know
/// `ToolContext`'s field layout.
pub fn tools_context(
    store: Arc<catalog_core::catalog::CatalogStore>,
    processor: Arc<catalog_core::processor::Processor>,
    rules: Arc<catalog_core::rules::RuleEngine>,
    supervisor: Arc<catalog_core::supervisor::SourceSupervisor>,
) -> ToolContext {
    ToolContext { store, processor, rules, supervisor }
}

//! JSON-RPC 2.0 dispatch over stdio, MCP-shaped. Mirrors the teacher's
//! `mcp.rs` `dispatch_jsonrpc`/`run_mcp` pair: newline-delimited JSON in
//! on stdin, newline-delimited JSON out on stdout, one request per line.

use crate::tools::{call_tool, tool_definitions, ToolContext};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];
const LATEST_VERSION: &str = "2025-03-26";

/// 500 KiB: past this, a tool response is compressed into a summary rather
/// than flooding the caller with raw text.
const MAX_RESPONSE_BYTES: usize = 500 * 1024;

/// How many of the largest flat-list entries survive into the summary.
const TOP_ENTRIES_LIMIT: usize = 50;

pub struct McpContext {
    pub tools: ToolContext,
    initialized: AtomicBool,
}

impl McpContext {
    pub fn new(tools: ToolContext) -> Self {
        Self { tools, initialized: AtomicBool::new(false) }
    }
}

fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS.iter().find(|v| **v == requested).copied().unwrap_or(LATEST_VERSION)
}

/// Dispatch one JSON-RPC message. Returns `None` for notifications (no
/// `id`), which never receive a response per the JSON-RPC 2.0 spec.
pub fn dispatch_jsonrpc(ctx: &McpContext, msg: &Value) -> Option<Value> {
    let id = msg.get("id").cloned();
    let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or("");

    if method != "initialize" && !ctx.initialized.load(Ordering::SeqCst) && id.is_some() {
        return Some(error_response(id, -32002, "server not initialized"));
    }

    match method {
        "initialize" => {
            ctx.initialized.store(true, Ordering::SeqCst);
            let requested = msg
                .get("params")
                .and_then(|p| p.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or(LATEST_VERSION);
            let version = negotiate_version(requested);
            Some(success_response(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "catalog-mcp", "version": env!("CARGO_PKG_VERSION") }
                }),
            ))
        }
        "ping" => Some(success_response(id, json!({}))),
        "tools/list" => Some(success_response(id, json!({ "tools": tool_definitions() }))),
        "tools/call" => {
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or(json!({}));
            let (content_text, is_error) = match call_tool(&ctx.tools, name, &args) {
                Ok(value) => (render_result(name, &value), false),
                Err(e) => (e.to_string(), true),
            };
            // Never set isError: true on the envelope — a sibling tool call
            // under a parallel dispatcher must not be killed because one
            // call in the batch failed. The failure is conveyed in-band by
            // prefixing the text instead.
            let text = if is_error { format!("\u{26a0} Error: {content_text}") } else { content_text };
            Some(success_response(id, json!({ "content": [{ "type": "text", "text": text }] })))
        }
        "prompts/list" => Some(success_response(id, json!({ "prompts": [] }))),
        "resources/list" => Some(success_response(id, json!({ "resources": [] }))),
        "notifications/initialized" => None,
        _ if id.is_none() => None,
        _ => Some(error_response(id, -32601, &format!("method not found: {method}"))),
    }
}

/// Apply the 500 KiB response-size gate. Results past the cap keep genuinely
/// usable content instead of a bare truncation marker: flat-list results
/// (`catalog.search`, `catalog.time_range`, ...) are compressed into
/// statistics over the full list plus the largest `TOP_ENTRIES_LIMIT`
/// entries by serialized size; results with no flat list to summarize fall
/// back to a minimal marker, since there is nothing left to show.
fn render_result(tool_name: &str, value: &Value) -> String {
    let rendered = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    if rendered.len() <= MAX_RESPONSE_BYTES {
        return rendered;
    }
    let summary = summarize_oversized(tool_name, value, rendered.len());
    serde_json::to_string(&summary).unwrap_or_else(|_| "{}".to_string())
}

/// Find the first array-valued field in an object result (or the value
/// itself, if it already is an array), returning its key (empty for a bare
/// array) alongside the items.
fn find_array_field(value: &Value) -> Option<(String, &Vec<Value>)> {
    match value {
        Value::Array(items) => Some((String::new(), items)),
        Value::Object(map) => map.iter().find_map(|(k, v)| match v {
            Value::Array(items) => Some((k.clone(), items)),
            _ => None,
        }),
        _ => None,
    }
}

fn summarize_oversized(tool_name: &str, value: &Value, original_size_bytes: usize) -> Value {
    let Some((field, items)) = find_array_field(value) else {
        return json!({
            "tool": tool_name,
            "truncated": true,
            "original_size_bytes": original_size_bytes,
            "message": "response exceeded the 500 KiB cap and has no flat list to summarize; re-query with a narrower scope",
        });
    };

    let mut sized: Vec<(usize, &Value)> = items.iter().map(|item| (serde_json::to_string(item).map(|s| s.len()).unwrap_or(0), item)).collect();
    sized.sort_by(|a, b| b.0.cmp(&a.0));
    let total_serialized_bytes: usize = sized.iter().map(|(n, _)| n).sum();
    let top_entries: Vec<&Value> = sized.iter().take(TOP_ENTRIES_LIMIT).map(|(_, v)| *v).collect();

    json!({
        "tool": tool_name,
        "truncated": true,
        "original_size_bytes": original_size_bytes,
        "statistics": {
            "field": field,
            "total_count": items.len(),
            "total_serialized_bytes": total_serialized_bytes,
            "returned_count": top_entries.len(),
        },
        "top_entries": top_entries,
        "message": format!(
            "response exceeded the 500 KiB cap; showing the {} largest of {} '{}' entries by serialized size",
            top_entries.len(), items.len(), field
        ),
    })
}

fn success_response(id: Option<Value>, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Stdio transport loop: one JSON-RPC message per line in, one per line out.
pub fn run_mcp(ctx: McpContext) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: Result<Value, _> = serde_json::from_str(&line);
        let response = match parsed {
            Ok(msg) => dispatch_jsonrpc(&ctx, &msg),
            Err(e) => Some(error_response(None, -32700, &format!("parse error: {e}"))),
        };
        if let Some(resp) = response {
            writeln!(out, "{}", serde_json::to_string(&resp)?)?;
            out.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::catalog::CatalogStore;
    use catalog_core::classifier::ClassifierRegistry;
    use catalog_core::cache::ArtifactCache;
    use catalog_core::metadata::MetadataExtractorRegistry;
    use catalog_core::processor::Processor;
    use catalog_core::rules::RuleEngine;
    use catalog_core::supervisor::SourceSupervisor;
    use catalog_core::walker::RunIdSource;
    use std::sync::Arc;

    fn make_ctx() -> McpContext {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let cache = Arc::new(ArtifactCache::new(std::env::temp_dir()));
        let classifiers = Arc::new(ClassifierRegistry::new());
        let extractors = Arc::new(MetadataExtractorRegistry::new());
        let processor = Arc::new(Processor::new(store.clone(), cache, classifiers, extractors));
        let rules = Arc::new(RuleEngine::new(store.clone()));
        let run_ids = Arc::new(RunIdSource::new());
        let supervisor = Arc::new(SourceSupervisor::new(store.clone(), run_ids));
        McpContext::new(ToolContext { store, processor, rules, supervisor })
    }

    #[test]
    fn rejects_calls_before_initialize() {
        let ctx = make_ctx();
        let msg = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let resp = dispatch_jsonrpc(&ctx, &msg).unwrap();
        assert!(resp.get("error").is_some());
    }

    #[test]
    fn tool_error_never_sets_is_error_true() {
        let ctx = make_ctx();
        let init = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} });
        dispatch_jsonrpc(&ctx, &init);

        let call = json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "resource_set.sum", "arguments": { "name": "does-not-exist", "metric": "size" } }
        });
        let resp = dispatch_jsonrpc(&ctx, &call).unwrap();
        let result = &resp["result"];
        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("\u{26a0} Error:"));
    }

    #[test]
    fn notifications_get_no_response() {
        let ctx = make_ctx();
        let msg = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(dispatch_jsonrpc(&ctx, &msg).is_none());
    }

    #[test]
    fn oversized_flat_list_result_keeps_top_entries() {
        let entries: Vec<Value> = (0..10_000).map(|i| json!({ "path": format!("/a/{i}"), "padding": "x".repeat(100) })).collect();
        let value = json!({ "entries": entries, "count": 10_000 });
        let rendered = render_result("catalog.search", &value);
        assert!(rendered.len() <= MAX_RESPONSE_BYTES);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["truncated"], true);
        assert_eq!(parsed["statistics"]["total_count"], 10_000);
        assert_eq!(parsed["statistics"]["field"], "entries");
        assert!(parsed["top_entries"].as_array().unwrap().len() <= TOP_ENTRIES_LIMIT);
        assert!(!parsed["top_entries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn undersized_result_passes_through_unmodified() {
        let value = json!({ "entries": [{"path": "/a"}], "count": 1 });
        let rendered = render_result("catalog.search", &value);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert!(parsed.get("truncated").is_none());
        assert_eq!(parsed["count"], 1);
    }
}

//! Tool schema definitions and the dispatch table mapping a tool name to
//! a catalog-core operation.

use catalog_core::catalog::{CatalogStore, ResourceSearchParams, SumMetric, TreeOptions};
use catalog_core::error::{CatalogError, Result};
use catalog_core::processor::Processor;
use catalog_core::rules::RuleEngine;
use catalog_core::supervisor::SourceSupervisor;
use catalog_core::types::{EntryKind, Rule, RuleCondition, RuleOutcome, SourceType};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ToolContext {
    pub store: Arc<CatalogStore>,
    pub processor: Arc<Processor>,
    pub rules: Arc<RuleEngine>,
    pub supervisor: Arc<SourceSupervisor>,
}

/// One JSON-RPC tool definition, MCP-shaped: `name`, `description`,
/// `inputSchema`, and an `annotations` block describing side effects
/// (`ro` = read-only, `mutating` = changes state, `additive` = only adds).
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "catalog.search",
            "description": "Search cataloged entries by kind, extension, name/path substring, size and mtime range",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "kind": {"type": "string", "enum": ["file", "directory"]},
                    "extension": {"type": "string"},
                    "name_contains": {"type": "string"},
                    "path_contains": {"type": "string"},
                    "min_size": {"type": "integer"},
                    "max_size": {"type": "integer"},
                    "min_mtime": {"type": "integer"},
                    "max_mtime": {"type": "integer"},
                    "limit": {"type": "integer", "default": 100},
                    "offset": {"type": "integer", "default": 0}
                }
            },
            "annotations": {"readOnlyHint": true}
        }),
        json!({
            "name": "catalog.tree",
            "description": "Return a hierarchical rollup of the catalog under a root path, summarizing directories past a child-count threshold",
            "inputSchema": {
                "type": "object",
                "required": ["root"],
                "properties": {
                    "root": {"type": "string"},
                    "max_depth": {"type": "integer"},
                    "child_threshold": {"type": "integer"}
                }
            },
            "annotations": {"readOnlyHint": true}
        }),
        json!({
            "name": "catalog.time_range",
            "description": "List entries whose mtime falls within [start, end)",
            "inputSchema": {
                "type": "object",
                "required": ["start", "end"],
                "properties": {
                    "start": {"type": "integer"},
                    "end": {"type": "integer"},
                    "root": {"type": "string"}
                }
            },
            "annotations": {"readOnlyHint": true}
        }),
        json!({
            "name": "resource_set.sum",
            "description": "Aggregate size/count/files/directories over a resource set, optionally including DAG descendants",
            "inputSchema": {
                "type": "object",
                "required": ["name", "metric"],
                "properties": {
                    "name": {"type": "string"},
                    "metric": {"type": "string", "enum": ["size", "count", "files", "directories"]},
                    "include_children": {"type": "boolean", "default": false}
                }
            },
            "annotations": {"readOnlyHint": true}
        }),
        json!({
            "name": "resource_set.create",
            "description": "Create a named resource set",
            "inputSchema": {
                "type": "object",
                "required": ["name"],
                "properties": {"name": {"type": "string"}, "description": {"type": "string"}}
            },
            "annotations": {"additiveHint": true}
        }),
        json!({
            "name": "rule.upsert",
            "description": "Create or replace a rule by name",
            "inputSchema": {
                "type": "object",
                "required": ["name", "condition", "outcome"],
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "enabled": {"type": "boolean", "default": true},
                    "priority": {"type": "integer", "default": 0},
                    "condition": {"type": "object"},
                    "outcome": {"type": "object"}
                }
            },
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "rule.list",
            "description": "List all rules ordered by priority descending then name ascending",
            "inputSchema": {"type": "object", "properties": {}},
            "annotations": {"readOnlyHint": true}
        }),
        json!({
            "name": "rule.delete",
            "description": "Delete a rule by name",
            "inputSchema": {"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}},
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "source.create",
            "description": "Register a new source (manual, live, or scheduled) rooted at a path",
            "inputSchema": {
                "type": "object",
                "required": ["name", "type", "root_path"],
                "properties": {
                    "name": {"type": "string"},
                    "type": {"type": "string", "enum": ["manual", "live", "scheduled"]},
                    "root_path": {"type": "string"}
                }
            },
            "annotations": {"additiveHint": true}
        }),
        json!({
            "name": "source.start",
            "description": "Start the live watcher for a source",
            "inputSchema": {"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}},
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "source.stop",
            "description": "Stop the live watcher for a source",
            "inputSchema": {"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}},
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "source.list",
            "description": "List all registered sources and their current status",
            "inputSchema": {"type": "object", "properties": {}},
            "annotations": {"readOnlyHint": true}
        }),
        json!({
            "name": "source.update",
            "description": "Update a source's name, root path, config, or enabled flag",
            "inputSchema": {
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": {"type": "string"},
                    "name": {"type": "string"},
                    "root_path": {"type": "string"},
                    "config": {"type": "object"},
                    "enabled": {"type": "boolean"}
                }
            },
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "rule.evaluate",
            "description": "Re-run the rule engine for a single cataloged path, dispatching any matching outcomes",
            "inputSchema": {
                "type": "object",
                "required": ["path"],
                "properties": {"path": {"type": "string"}}
            },
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "classifier.generate_thumbnail",
            "description": "Generate (or fetch from cache) a thumbnail for a file:// resource",
            "inputSchema": {
                "type": "object",
                "required": ["resource", "mtime"],
                "properties": {"resource": {"type": "string"}, "mtime": {"type": "integer"}}
            },
            "annotations": {"mutatingHint": true}
        }),
        json!({
            "name": "catalog.process_resource",
            "description": "Resolve a resource (file://, http(s)://, or synthesis://) and generate its default (or explicitly requested) artifact types",
            "inputSchema": {
                "type": "object",
                "required": ["resource", "mtime"],
                "properties": {
                    "resource": {"type": "string"},
                    "mtime": {"type": "integer"},
                    "artifact_types": {"type": "array", "items": {"type": "string", "enum": ["thumbnail", "timeline", "metadata"]}},
                    "timeline_duration_seconds": {"type": "number"},
                    "timeline_frame_count": {"type": "integer"}
                }
            },
            "annotations": {"mutatingHint": true}
        }),
    ]
}

/// Dispatch a `tools/call` by name. Returns the tool's JSON result on
/// success; the caller is responsible for the never-`isError`-true
/// convention at the protocol layer.
pub fn call_tool(ctx: &ToolContext, name: &str, args: &Value) -> Result<Value> {
    match name {
        "catalog.search" => catalog_search(ctx, args),
        "catalog.tree" => catalog_tree(ctx, args),
        "catalog.time_range" => catalog_time_range(ctx, args),
        "resource_set.sum" => resource_set_sum(ctx, args),
        "resource_set.create" => resource_set_create(ctx, args),
        "rule.upsert" => rule_upsert(ctx, args),
        "rule.list" => rule_list(ctx),
        "rule.delete" => rule_delete(ctx, args),
        "rule.evaluate" => rule_evaluate(ctx, args),
        "source.create" => source_create(ctx, args),
        "source.start" => source_start(ctx, args),
        "source.stop" => source_stop(ctx, args),
        "source.list" => source_list(ctx),
        "source.update" => source_update(ctx, args),
        "classifier.generate_thumbnail" => generate_thumbnail(ctx, args),
        "catalog.process_resource" => process_resource(ctx, args),
        other => Err(CatalogError::not_found(format!("unknown tool '{other}'"))),
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key).and_then(|v| v.as_str()).ok_or_else(|| CatalogError::invalid(format!("missing required argument '{key}'")))
}

fn catalog_search(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let params = ResourceSearchParams {
        kind: args.get("kind").and_then(|v| v.as_str()).map(|s| if s == "directory" { EntryKind::Directory } else { EntryKind::File }),
        extension: args.get("extension").and_then(|v| v.as_str()).map(String::from),
        name_substring: args.get("name_contains").and_then(|v| v.as_str()).map(String::from),
        path_substring: args.get("path_contains").and_then(|v| v.as_str()).map(String::from),
        min_size: args.get("min_size").and_then(|v| v.as_u64()),
        max_size: args.get("max_size").and_then(|v| v.as_u64()),
        min_mtime: args.get("min_mtime").and_then(|v| v.as_i64()),
        max_mtime: args.get("max_mtime").and_then(|v| v.as_i64()),
        limit: args.get("limit").and_then(|v| v.as_i64()).unwrap_or(100),
        offset: args.get("offset").and_then(|v| v.as_i64()).unwrap_or(0),
        ..Default::default()
    };
    let entries = ctx.store.resource_search(&params)?;
    Ok(json!({ "entries": entries, "count": entries.len() }))
}

fn catalog_tree(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let root = str_arg(args, "root")?;
    let mut options = TreeOptions::default();
    if let Some(d) = args.get("max_depth").and_then(|v| v.as_u64()) {
        options.max_depth = d as usize;
    }
    if let Some(t) = args.get("child_threshold").and_then(|v| v.as_u64()) {
        options.child_threshold = t as usize;
    }
    let tree = ctx.store.get_tree(root, &options)?;
    Ok(serde_json::to_value(tree)?)
}

fn catalog_time_range(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let start = args.get("start").and_then(|v| v.as_i64()).ok_or_else(|| CatalogError::invalid("missing 'start'"))?;
    let end = args.get("end").and_then(|v| v.as_i64()).ok_or_else(|| CatalogError::invalid("missing 'end'"))?;
    let root = args.get("root").and_then(|v| v.as_str());
    let entries = ctx.store.by_time_range(start, end, root)?;
    Ok(json!({ "entries": entries, "count": entries.len() }))
}

fn resource_set_sum(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = str_arg(args, "name")?;
    let metric = match str_arg(args, "metric")? {
        "size" => SumMetric::Size,
        "count" => SumMetric::Count,
        "files" => SumMetric::Files,
        "directories" => SumMetric::Directories,
        other => return Err(CatalogError::invalid(format!("unknown metric '{other}'"))),
    };
    let include_children = args.get("include_children").and_then(|v| v.as_bool()).unwrap_or(false);
    let total = ctx.store.resource_sum(name, metric, include_children)?;
    Ok(json!({ "name": name, "total": total }))
}

fn resource_set_create(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = str_arg(args, "name")?;
    let description = args.get("description").and_then(|v| v.as_str()).unwrap_or("");
    let set = ctx.store.create_resource_set(name, description, "manual")?;
    Ok(serde_json::to_value(set)?)
}

fn rule_upsert(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = str_arg(args, "name")?.to_string();
    let condition: RuleCondition = serde_json::from_value(args.get("condition").cloned().unwrap_or(Value::Null))
        .map_err(|e| CatalogError::invalid(format!("invalid condition: {e}")))?;
    let outcome: RuleOutcome = serde_json::from_value(args.get("outcome").cloned().unwrap_or(Value::Null))
        .map_err(|e| CatalogError::invalid(format!("invalid outcome: {e}")))?;
    let rule = Rule {
        id: 0,
        name,
        description: args.get("description").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        enabled: args.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
        priority: args.get("priority").and_then(|v| v.as_i64()).unwrap_or(0),
        condition,
        outcome,
        created_at: 0,
        updated_at: 0,
    };
    let saved = ctx.store.upsert_rule(&rule)?;
    Ok(serde_json::to_value(saved)?)
}

fn rule_list(ctx: &ToolContext) -> Result<Value> {
    let rules = ctx.store.list_rules()?;
    Ok(json!({ "rules": rules }))
}

fn rule_delete(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = str_arg(args, "name")?;
    let deleted = ctx.store.delete_rule(name)?;
    Ok(json!({ "deleted": deleted }))
}

fn rule_evaluate(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let path = str_arg(args, "path")?;
    let entry = ctx
        .store
        .get_entry(path)?
        .ok_or_else(|| CatalogError::not_found(format!("no cataloged entry at '{path}'")))?;
    let fired = ctx.rules.execute_for_path(&entry)?;
    Ok(json!({ "path": path, "rules_fired": fired }))
}

fn source_create(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = str_arg(args, "name")?;
    let root_path = str_arg(args, "root_path")?;
    let source_type = match str_arg(args, "type")? {
        "live" => SourceType::Live,
        "scheduled" => SourceType::Scheduled,
        _ => SourceType::Manual,
    };
    let source = ctx.supervisor.create(name, source_type, root_path, json!({}))?;
    Ok(serde_json::to_value(source)?)
}

fn source_start(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let id = str_arg(args, "id")?;
    ctx.supervisor.start(id)?;
    Ok(json!({ "started": true }))
}

fn source_stop(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let id = str_arg(args, "id")?;
    ctx.supervisor.stop(id)?;
    Ok(json!({ "stopped": true }))
}

fn source_list(ctx: &ToolContext) -> Result<Value> {
    let sources = ctx.supervisor.list();
    Ok(json!({ "sources": sources }))
}

fn source_update(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let id = str_arg(args, "id")?;
    let name = args.get("name").and_then(|v| v.as_str());
    let root_path = args.get("root_path").and_then(|v| v.as_str());
    let config = args.get("config").cloned();
    let enabled = args.get("enabled").and_then(|v| v.as_bool());
    let source = ctx.supervisor.update(id, name, root_path, config, enabled)?;
    Ok(serde_json::to_value(source)?)
}

fn generate_thumbnail(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let resource = str_arg(args, "resource")?;
    let mtime = args.get("mtime").and_then(|v| v.as_i64()).ok_or_else(|| CatalogError::invalid("missing 'mtime'"))?;
    let artifact = ctx.processor.process_thumbnail(resource, mtime)?;
    Ok(serde_json::to_value(artifact)?)
}

fn process_resource(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let resource = str_arg(args, "resource")?.to_string();
    let mtime = args.get("mtime").and_then(|v| v.as_i64()).ok_or_else(|| CatalogError::invalid("missing 'mtime'"))?;
    let artifact_types = args
        .get("artifact_types")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect());
    let request = catalog_core::processor::ProcessResourceRequest {
        resource,
        mtime,
        artifact_types,
        timeline_duration_seconds: args.get("timeline_duration_seconds").and_then(|v| v.as_f64()),
        timeline_frame_count: args.get("timeline_frame_count").and_then(|v| v.as_u64()).map(|n| n as usize),
    };
    let outcome = ctx.processor.process_resource(request)?;
    Ok(json!({ "artifacts": outcome.artifacts, "errors": outcome.errors }))
}


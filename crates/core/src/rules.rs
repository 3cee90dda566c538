//! The Rule Engine (C6): a pure condition evaluator over recursive
//! predicate trees, plus an outcome dispatcher that calls out to
//! registered tool handlers.

use crate::catalog::CatalogStore;
use crate::error::{CatalogError, Result};
use crate::types::{infer_media_type, Entry, EntryKind, Rule, RuleCondition, RuleOutcome, ToolCall};
use regex::Regex;
use std::sync::Arc;

/// A tool the outcome dispatcher can invoke, named by `RuleOutcome::Tool.tool`.
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, store: &CatalogStore, entry: &Entry, call: &ToolCall) -> Result<()>;
}

/// Built-in handler for `selection_set.add`, the only outcome tool the
/// rule engine itself understands; every other tool name is expected to
/// come from the classifier/processor facade registered at startup.
pub struct SelectionSetAddHandler;

impl ToolHandler for SelectionSetAddHandler {
    fn name(&self) -> &str {
        "selection_set.add"
    }

    fn call(&self, store: &CatalogStore, entry: &Entry, call: &ToolCall) -> Result<()> {
        let set_name = call
            .args
            .get("set")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CatalogError::invalid("selection_set.add requires a 'set' argument"))?;
        if store.get_resource_set(set_name)?.is_none() {
            store.create_resource_set(set_name, "", "rule")?;
        }
        store.add_to_resource_set(set_name, &entry.path)?;
        Ok(())
    }
}

pub struct RuleEngine {
    store: Arc<CatalogStore>,
    handlers: Vec<Box<dyn ToolHandler>>,
}

impl RuleEngine {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store, handlers: vec![Box::new(SelectionSetAddHandler)] }
    }

    pub fn register_handler(&mut self, handler: Box<dyn ToolHandler>) {
        self.handlers.push(handler);
    }

    /// Evaluate every enabled rule against `entry`, in priority-desc /
    /// name-asc order, dispatching the outcome of the first match per
    /// rule (rules are not mutually exclusive: all matching rules fire).
    pub fn execute_for_path(&self, entry: &Entry) -> Result<Vec<String>> {
        let rules = self.store.list_enabled_rules()?;
        let mut fired = Vec::new();
        for rule in rules {
            let start = std::time::Instant::now();
            match evaluate_condition(&rule.condition, entry) {
                Ok(true) => {
                    let result = self.dispatch_outcome(&rule.outcome, entry);
                    let duration_ms = start.elapsed().as_millis() as i64;
                    match result {
                        Ok(()) => {
                            self.store.record_rule_execution(rule.id, "completed", 1, 1, None, duration_ms)?;
                            fired.push(rule.name.clone());
                        }
                        Err(e) => {
                            tracing::warn!(rule = %rule.name, error = %e, "rule outcome dispatch failed");
                            self.store.record_rule_execution(rule.id, "failed", 1, 0, Some(&e.message), duration_ms)?;
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(rule = %rule.name, error = %e, "rule condition evaluation failed");
                    self.store.record_rule_execution(rule.id, "failed", 0, 0, Some(&e.message), start.elapsed().as_millis() as i64)?;
                }
            }
        }
        Ok(fired)
    }

    fn dispatch_outcome(&self, outcome: &RuleOutcome, entry: &Entry) -> Result<()> {
        match outcome {
            RuleOutcome::Tool(call) => self.dispatch_tool(entry, call),
            RuleOutcome::Chained { outcomes, stop_on_error } => {
                let mut errors = Vec::new();
                for o in outcomes {
                    if let Err(e) = self.dispatch_outcome(o, entry) {
                        if *stop_on_error {
                            return Err(e);
                        }
                        errors.push(e.message);
                    }
                }
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(CatalogError::internal(format!("{} of {} chained outcomes failed: {}", errors.len(), outcomes.len(), errors.join("; "))))
                }
            }
        }
    }

    fn dispatch_tool(&self, entry: &Entry, call: &ToolCall) -> Result<()> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.name() == call.tool)
            .ok_or_else(|| CatalogError::not_found(format!("no tool handler registered for '{}'", call.tool)))?;
        handler.call(&self.store, entry, call)
    }
}

/// Pure predicate evaluation; never panics on a malformed leaf — a missing
/// bound simply never excludes a match, except `path.regex`, whose invalid
/// pattern is a hard error surfaced to the caller (per spec).
pub fn evaluate_condition(condition: &RuleCondition, entry: &Entry) -> Result<bool> {
    match condition {
        RuleCondition::All { children } => {
            for c in children {
                if !evaluate_condition(c, entry)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleCondition::Any { children } => {
            for c in children {
                if evaluate_condition(c, entry)? {
                    return Ok(true);
                }
            }
            Ok(children.is_empty())
        }
        RuleCondition::None { children } => {
            for c in children {
                if evaluate_condition(c, entry)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleCondition::MediaType { media_type } => {
            Ok(infer_media_type(&entry.path) == Some(*media_type))
        }
        RuleCondition::Size { leaf } => {
            if let Some(min) = leaf.min_size {
                if entry.size < min {
                    return Ok(false);
                }
            }
            if let Some(max) = leaf.max_size {
                if entry.size > max {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleCondition::Time { leaf } => {
            if let Some(v) = leaf.min_mtime {
                if entry.mtime < v {
                    return Ok(false);
                }
            }
            if let Some(v) = leaf.max_mtime {
                if entry.mtime > v {
                    return Ok(false);
                }
            }
            if let Some(v) = leaf.min_ctime {
                if entry.ctime < v {
                    return Ok(false);
                }
            }
            if let Some(v) = leaf.max_ctime {
                if entry.ctime > v {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleCondition::Path { leaf } => {
            if let Some(s) = &leaf.contains {
                if !entry.path.contains(s.as_str()) {
                    return Ok(false);
                }
            }
            if let Some(s) = &leaf.prefix {
                if !entry.path.starts_with(s.as_str()) {
                    return Ok(false);
                }
            }
            if let Some(s) = &leaf.suffix {
                if !entry.path.ends_with(s.as_str()) {
                    return Ok(false);
                }
            }
            if let Some(pattern) = &leaf.regex {
                let re = Regex::new(pattern)
                    .map_err(|e| CatalogError::invalid(format!("invalid path.regex '{pattern}': {e}")))?;
                if !re.is_match(&entry.path) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaType, PathLeaf, SizeLeaf};

    fn entry(path: &str, size: u64, mtime: i64) -> Entry {
        Entry { id: 1, path: path.to_string(), parent: None, size, kind: EntryKind::File, ctime: mtime, mtime, last_scanned: 0 }
    }

    #[test]
    fn all_is_conjunction() {
        let c = RuleCondition::All {
            children: vec![
                RuleCondition::Size { leaf: SizeLeaf { min_size: Some(10), max_size: None } },
                RuleCondition::MediaType { media_type: MediaType::Image },
            ],
        };
        assert!(evaluate_condition(&c, &entry("/a.jpg", 20, 0)).unwrap());
        assert!(!evaluate_condition(&c, &entry("/a.jpg", 5, 0)).unwrap());
    }

    #[test]
    fn none_inverts_any_match() {
        let c = RuleCondition::None { children: vec![RuleCondition::Path { leaf: PathLeaf { contains: Some("tmp".into()), ..Default::default() } }] };
        assert!(evaluate_condition(&c, &entry("/data/a.jpg", 1, 0)).unwrap());
        assert!(!evaluate_condition(&c, &entry("/tmp/a.jpg", 1, 0)).unwrap());
    }

    #[test]
    fn invalid_regex_is_a_hard_error() {
        let c = RuleCondition::Path { leaf: PathLeaf { regex: Some("(".into()), ..Default::default() } };
        assert!(evaluate_condition(&c, &entry("/a.jpg", 1, 0)).is_err());
    }

    #[test]
    fn empty_any_never_matches() {
        let c = RuleCondition::Any { children: vec![] };
        assert!(!evaluate_condition(&c, &entry("/a.jpg", 1, 0)).unwrap());
    }

    #[test]
    fn chained_outcome_stops_on_error_when_flagged() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let engine = RuleEngine::new(store.clone());
        let outcome = RuleOutcome::Chained {
            outcomes: vec![
                RuleOutcome::Tool(ToolCall { tool: "missing.tool".into(), args: Default::default() }),
                RuleOutcome::Tool(ToolCall { tool: "selection_set.add".into(), args: [("set".to_string(), serde_json::json!("s"))].into_iter().collect() }),
            ],
            stop_on_error: true,
        };
        let e = entry("/a.jpg", 1, 0);
        assert!(engine.dispatch_outcome(&outcome, &e).is_err());
        assert!(store.list_resource_set_entries("s").is_err());
    }

    #[test]
    fn chained_outcome_joins_all_errors_when_not_stopping() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let engine = RuleEngine::new(store.clone());
        let outcome = RuleOutcome::Chained {
            outcomes: vec![
                RuleOutcome::Tool(ToolCall { tool: "missing.tool.a".into(), args: Default::default() }),
                RuleOutcome::Tool(ToolCall { tool: "selection_set.add".into(), args: [("set".to_string(), serde_json::json!("s"))].into_iter().collect() }),
                RuleOutcome::Tool(ToolCall { tool: "missing.tool.b".into(), args: Default::default() }),
            ],
            stop_on_error: false,
        };
        let e = entry("/a.jpg", 1, 0);
        let err = engine.dispatch_outcome(&outcome, &e).unwrap_err();
        assert!(err.message.contains("missing.tool.a"));
        assert!(err.message.contains("missing.tool.b"));
        // The non-failing middle outcome still ran despite later failures.
        assert_eq!(store.list_resource_set_entries("s").unwrap().len(), 1);
    }
}

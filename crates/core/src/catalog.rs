//! The Catalog Store (C1): a single embedded SQL database behind a mutex,
//! exposing idempotent upserts, typed range queries, and a hierarchical
//! tree rollup.

use crate::error::{CatalogError, Result};
use crate::types::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct CatalogStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    parent TEXT,
    size INTEGER NOT NULL,
    kind TEXT NOT NULL,
    ctime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    last_scanned INTEGER NOT NULL,
    dirty INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_entries_mtime ON entries(mtime);
CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent);
CREATE INDEX IF NOT EXISTS idx_entries_last_scanned ON entries(last_scanned);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    condition_json TEXT NOT NULL,
    outcome_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL,
    selection_set_id INTEGER,
    executed_at INTEGER NOT NULL,
    entries_matched INTEGER NOT NULL DEFAULT 0,
    entries_processed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error_message TEXT,
    duration_ms INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rule_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL,
    selection_set_id INTEGER,
    entry_path TEXT NOT NULL,
    outcome_type TEXT NOT NULL,
    outcome_data TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    hash TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    metadata_type TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    cache_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    metadata_json TEXT NOT NULL,
    generator TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS selection_sets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    criteria_type TEXT NOT NULL DEFAULT 'manual',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS selection_set_entries (
    set_id INTEGER NOT NULL,
    entry_path TEXT NOT NULL,
    PRIMARY KEY (set_id, entry_path)
);

CREATE TABLE IF NOT EXISTS resource_set_edges (
    parent_id INTEGER NOT NULL,
    child_id INTEGER NOT NULL,
    PRIMARY KEY (parent_id, child_id)
);

CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    type TEXT NOT NULL,
    root_path TEXT NOT NULL,
    config_json TEXT NOT NULL,
    status TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS index_jobs (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS classifier_jobs (
    id TEXT PRIMARY KEY,
    resource_url TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Row <-> type mapping helpers
// ---------------------------------------------------------------------------

fn entry_kind_to_str(k: EntryKind) -> &'static str {
    match k {
        EntryKind::File => "file",
        EntryKind::Directory => "directory",
    }
}

fn entry_kind_from_str(s: &str) -> EntryKind {
    if s == "directory" {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        path: row.get(1)?,
        parent: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        kind: entry_kind_from_str(&row.get::<_, String>(4)?),
        ctime: row.get(5)?,
        mtime: row.get(6)?,
        last_scanned: row.get(7)?,
    })
}

const ENTRY_COLS: &str = "id, path, parent, size, kind, ctime, mtime, last_scanned";

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ResourceSearchParams {
    pub kind: Option<EntryKind>,
    pub extension: Option<String>,
    pub name_substring: Option<String>,
    pub path_substring: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_mtime: Option<i64>,
    pub max_mtime: Option<i64>,
    pub limit: i64,
    pub offset: i64,
    pub sort: SortField,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Name,
    Size,
    Mtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumMetric {
    Size,
    Count,
    Files,
    Directories,
}

#[derive(Debug, Clone)]
pub struct TreeOptions {
    pub max_depth: usize,
    pub min_size: u64,
    pub limit: usize,
    pub child_threshold: usize,
    pub min_mtime: Option<i64>,
    pub max_mtime: Option<i64>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self { max_depth: 64, min_size: 0, limit: 5000, child_threshold: 200, min_mtime: None, max_mtime: None }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TreeSummary {
    pub total_children: usize,
    pub file_count: usize,
    pub directory_count: usize,
    pub total_size: u64,
    pub largest_children: Vec<(String, u64)>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TreeNode {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TreeSummary>,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // -- Entries -------------------------------------------------------

    /// Idempotent upsert keyed by `path`.
    pub fn upsert_entry(
        &self,
        path: &str,
        parent: Option<&str>,
        size: u64,
        kind: EntryKind,
        ctime: i64,
        mtime: i64,
        run_id: i64,
    ) -> Result<Entry> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entries (path, parent, size, kind, ctime, mtime, last_scanned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                parent = excluded.parent,
                size = excluded.size,
                kind = excluded.kind,
                ctime = excluded.ctime,
                mtime = excluded.mtime,
                last_scanned = excluded.last_scanned",
            params![path, parent, size as i64, entry_kind_to_str(kind), ctime, mtime, run_id],
        )?;
        let row = conn.query_row(
            &format!("SELECT {ENTRY_COLS} FROM entries WHERE path = ?1"),
            params![path],
            row_to_entry,
        )?;
        Ok(row)
    }

    pub fn get_entry(&self, path: &str) -> Result<Option<Entry>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(&format!("SELECT {ENTRY_COLS} FROM entries WHERE path = ?1"), params![path], row_to_entry)
            .optional()?;
        Ok(row)
    }

    /// Delete an entry and every descendant (`path = P OR path LIKE P/%`).
    pub fn delete_entry_cascade(&self, path: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let like_pattern = format!("{path}/%");
        let n = conn.execute(
            "DELETE FROM entries WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
            params![path, like_pattern],
        )?;
        Ok(n)
    }

    /// Sweep entries under `root` whose `last_scanned` predates `run_id`.
    pub fn sweep(&self, root: &str, run_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let like_pattern = format!("{root}/%");
        let n = conn.execute(
            "DELETE FROM entries WHERE last_scanned < ?1 AND (path = ?2 OR path LIKE ?3 ESCAPE '\\')",
            params![run_id, root, like_pattern],
        )?;
        Ok(n)
    }

    pub fn by_time_range(&self, start: i64, end: i64, root: Option<&str>) -> Result<Vec<Entry>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        if let Some(root) = root {
            let like_pattern = format!("{root}/%");
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLS} FROM entries WHERE mtime >= ?1 AND mtime < ?2 AND (path = ?3 OR path LIKE ?4 ESCAPE '\\') ORDER BY path"
            ))?;
            let rows = stmt.query_map(params![start, end, root, like_pattern], row_to_entry)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt =
                conn.prepare(&format!("SELECT {ENTRY_COLS} FROM entries WHERE mtime >= ?1 AND mtime < ?2 ORDER BY path"))?;
            let rows = stmt.query_map(params![start, end], row_to_entry)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    pub fn resource_search(&self, params: &ResourceSearchParams) -> Result<Vec<Entry>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = format!("SELECT {ENTRY_COLS} FROM entries WHERE 1=1");
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(kind) = params.kind {
            sql.push_str(" AND kind = ?");
            bind.push(Box::new(entry_kind_to_str(kind).to_string()));
        }
        if let Some(ext) = &params.extension {
            sql.push_str(" AND path LIKE ?");
            bind.push(Box::new(format!("%.{ext}")));
        }
        if let Some(sub) = &params.name_substring {
            sql.push_str(" AND path LIKE ?");
            bind.push(Box::new(format!("%{sub}%")));
        }
        if let Some(sub) = &params.path_substring {
            sql.push_str(" AND path LIKE ?");
            bind.push(Box::new(format!("%{sub}%")));
        }
        if let Some(v) = params.min_size {
            sql.push_str(" AND size >= ?");
            bind.push(Box::new(v as i64));
        }
        if let Some(v) = params.max_size {
            sql.push_str(" AND size <= ?");
            bind.push(Box::new(v as i64));
        }
        if let Some(v) = params.min_mtime {
            sql.push_str(" AND mtime >= ?");
            bind.push(Box::new(v));
        }
        if let Some(v) = params.max_mtime {
            sql.push_str(" AND mtime <= ?");
            bind.push(Box::new(v));
        }

        let sort_col = match params.sort {
            SortField::Name => "path",
            SortField::Size => "size",
            SortField::Mtime => "mtime",
        };
        sql.push_str(&format!(" ORDER BY {sort_col} {}", if params.descending { "DESC" } else { "ASC" }));
        sql.push_str(" LIMIT ? OFFSET ?");
        bind.push(Box::new(params.limit.max(0)));
        bind.push(Box::new(params.offset.max(0)));

        let refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), row_to_entry)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Aggregate a resource-set metric, optionally traversing DAG descendants.
    pub fn resource_sum(&self, name: &str, metric: SumMetric, include_children: bool) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let set_id: i64 = conn
            .query_row("SELECT id FROM selection_sets WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| CatalogError::not_found(format!("resource set '{name}' not found")))?;

        let mut set_ids = vec![set_id];
        if include_children {
            set_ids.extend(self.collect_descendants(&conn, set_id)?);
        }

        let mut total: u64 = 0;
        for sid in set_ids {
            let mut stmt = conn.prepare(
                "SELECT e.size, e.kind FROM selection_set_entries s
                 JOIN entries e ON e.path = s.entry_path
                 WHERE s.set_id = ?1",
            )?;
            let rows = stmt.query_map(params![sid], |r| {
                Ok((r.get::<_, i64>(0)? as u64, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (size, kind) = row?;
                match metric {
                    SumMetric::Size => total += size,
                    SumMetric::Count => total += 1,
                    SumMetric::Files => {
                        if kind == "file" {
                            total += 1;
                        }
                    }
                    SumMetric::Directories => {
                        if kind == "directory" {
                            total += 1;
                        }
                    }
                }
            }
        }
        Ok(total)
    }

    fn collect_descendants(&self, conn: &Connection, root: i64) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        let mut frontier = vec![root];
        let mut seen = std::collections::HashSet::new();
        seen.insert(root);
        while let Some(id) = frontier.pop() {
            let mut stmt = conn.prepare("SELECT child_id FROM resource_set_edges WHERE parent_id = ?1")?;
            let children: Vec<i64> = stmt
                .query_map(params![id], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            for c in children {
                if seen.insert(c) {
                    out.push(c);
                    frontier.push(c);
                }
            }
        }
        Ok(out)
    }

    /// Hierarchical rollup under `root`, summarizing directories whose
    /// immediate child count exceeds `options.child_threshold`.
    pub fn get_tree(&self, root: &str, options: &TreeOptions) -> Result<TreeNode> {
        let conn = self.conn.lock().unwrap();
        let mut node_budget = options.limit;
        build_tree_node(&conn, root, 0, options, &mut node_budget)
    }

    // -- Rules -----------------------------------------------------------

    pub fn upsert_rule(&self, rule: &Rule) -> Result<Rule> {
        rule.outcome.validate()?;
        let conn = self.conn.lock().unwrap();
        let ts = now();
        let cond = serde_json::to_string(&rule.condition)?;
        let outcome = serde_json::to_string(&rule.outcome)?;
        conn.execute(
            "INSERT INTO rules (name, description, enabled, priority, condition_json, outcome_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                enabled = excluded.enabled,
                priority = excluded.priority,
                condition_json = excluded.condition_json,
                outcome_json = excluded.outcome_json,
                updated_at = ?7",
            params![rule.name, rule.description, rule.enabled, rule.priority, cond, outcome, ts],
        )?;
        drop(conn);
        self.get_rule_by_name(&rule.name)?.ok_or_else(|| CatalogError::internal("rule vanished after upsert"))
    }

    pub fn get_rule_by_name(&self, name: &str) -> Result<Option<Rule>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, description, enabled, priority, condition_json, outcome_json, created_at, updated_at
             FROM rules WHERE name = ?1",
            params![name],
            row_to_rule,
        )
        .optional()
        .map_err(CatalogError::from)
    }

    pub fn get_rule_by_id(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, description, enabled, priority, condition_json, outcome_json, created_at, updated_at
             FROM rules WHERE id = ?1",
            params![id],
            row_to_rule,
        )
        .optional()
        .map_err(CatalogError::from)
    }

    pub fn delete_rule(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM rules WHERE name = ?1", params![name])?;
        Ok(n > 0)
    }

    /// Enabled rules, ordered by `priority` descending then `name` ascending.
    pub fn list_enabled_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enabled, priority, condition_json, outcome_json, created_at, updated_at
             FROM rules WHERE enabled = 1 ORDER BY priority DESC, name ASC",
        )?;
        let rows = stmt.query_map([], row_to_rule)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn list_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enabled, priority, condition_json, outcome_json, created_at, updated_at
             FROM rules ORDER BY priority DESC, name ASC",
        )?;
        let rows = stmt.query_map([], row_to_rule)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn record_rule_execution(
        &self,
        rule_id: i64,
        status: &str,
        entries_matched: i64,
        entries_processed: i64,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rule_executions (rule_id, executed_at, entries_matched, entries_processed, status, error_message, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![rule_id, now(), entries_matched, entries_processed, status, error_message, duration_ms],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // -- Resource sets -----------------------------------------------------

    pub fn create_resource_set(&self, name: &str, description: &str, criteria_type: &str) -> Result<ResourceSet> {
        let conn = self.conn.lock().unwrap();
        let ts = now();
        conn.execute(
            "INSERT INTO selection_sets (name, description, criteria_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, description, criteria_type, ts],
        )
        .map_err(|e| map_unique_violation(e, "resource set", name))?;
        let id = conn.last_insert_rowid();
        Ok(ResourceSet {
            id,
            name: name.to_string(),
            description: description.to_string(),
            criteria_type: criteria_type.to_string(),
            created_at: ts,
            updated_at: ts,
        })
    }

    pub fn get_resource_set(&self, name: &str) -> Result<Option<ResourceSet>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, description, criteria_type, created_at, updated_at FROM selection_sets WHERE name = ?1",
            params![name],
            |row| {
                Ok(ResourceSet {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    criteria_type: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(CatalogError::from)
    }

    pub fn delete_resource_set(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> =
            conn.query_row("SELECT id FROM selection_sets WHERE name = ?1", params![name], |r| r.get(0)).optional()?;
        let Some(id) = id else { return Ok(false) };
        conn.execute("DELETE FROM selection_set_entries WHERE set_id = ?1", params![id])?;
        conn.execute("DELETE FROM resource_set_edges WHERE parent_id = ?1 OR child_id = ?1", params![id])?;
        conn.execute("DELETE FROM selection_sets WHERE id = ?1", params![id])?;
        Ok(true)
    }

    pub fn add_to_resource_set(&self, name: &str, entry_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let id: i64 = conn
            .query_row("SELECT id FROM selection_sets WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| CatalogError::not_found(format!("resource set '{name}' not found")))?;
        conn.execute(
            "INSERT OR IGNORE INTO selection_set_entries (set_id, entry_path) VALUES (?1, ?2)",
            params![id, entry_path],
        )?;
        Ok(())
    }

    pub fn list_resource_set_entries(&self, name: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let id: i64 = conn
            .query_row("SELECT id FROM selection_sets WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| CatalogError::not_found(format!("resource set '{name}' not found")))?;
        let mut stmt = conn.prepare("SELECT entry_path FROM selection_set_entries WHERE set_id = ?1 ORDER BY entry_path")?;
        let rows = stmt.query_map(params![id], |r| r.get(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Link `child` under `parent`, rejecting any edge that would create a cycle.
    pub fn link_resource_sets(&self, parent: &str, child: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let parent_id: i64 = conn
            .query_row("SELECT id FROM selection_sets WHERE name = ?1", params![parent], |r| r.get(0))
            .optional()?
            .ok_or_else(|| CatalogError::not_found(format!("resource set '{parent}' not found")))?;
        let child_id: i64 = conn
            .query_row("SELECT id FROM selection_sets WHERE name = ?1", params![child], |r| r.get(0))
            .optional()?
            .ok_or_else(|| CatalogError::not_found(format!("resource set '{child}' not found")))?;

        if parent_id == child_id {
            return Err(CatalogError::conflict("a resource set cannot be its own child"));
        }
        // Reject the edge if `parent_id` is reachable from `child_id` (would create a cycle).
        let descendants_of_child = self.collect_descendants(&conn, child_id)?;
        if descendants_of_child.contains(&parent_id) {
            return Err(CatalogError::conflict("edge would create a cycle in the resource-set DAG"));
        }
        conn.execute(
            "INSERT OR IGNORE INTO resource_set_edges (parent_id, child_id) VALUES (?1, ?2)",
            params![parent_id, child_id],
        )?;
        Ok(())
    }

    // -- Artifacts ---------------------------------------------------------

    pub fn upsert_artifact(&self, artifact: &Artifact) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metadata (hash, source_path, metadata_type, mime_type, cache_path, file_size, metadata_json, generator, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(hash) DO UPDATE SET
                source_path = excluded.source_path,
                metadata_type = excluded.metadata_type,
                mime_type = excluded.mime_type,
                cache_path = excluded.cache_path,
                file_size = excluded.file_size,
                metadata_json = excluded.metadata_json,
                generator = excluded.generator",
            params![
                artifact.hash,
                artifact.source_path,
                artifact.artifact_type,
                artifact.mime_type,
                artifact.cache_path,
                artifact.file_size as i64,
                artifact.metadata_json.to_string(),
                artifact.generator,
                artifact.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_artifact(&self, hash: &str) -> Result<Option<Artifact>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT hash, source_path, metadata_type, mime_type, cache_path, file_size, metadata_json, generator, created_at
             FROM metadata WHERE hash = ?1",
            params![hash],
            row_to_artifact,
        )
        .optional()
        .map_err(CatalogError::from)
    }

    pub fn delete_artifact(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM metadata WHERE hash = ?1", params![hash])?;
        Ok(n > 0)
    }

    // -- Sources -------------------------------------------------------

    pub fn upsert_source(&self, source: &Source) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sources (id, name, type, root_path, config_json, status, enabled, created_at, updated_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, type = excluded.type, root_path = excluded.root_path,
                config_json = excluded.config_json, status = excluded.status, enabled = excluded.enabled,
                updated_at = excluded.updated_at, last_error = excluded.last_error",
            params![
                source.id,
                source.name,
                source_type_str(source.source_type),
                source.root_path,
                source.config_json.to_string(),
                source_status_str(source.status),
                source.enabled,
                source.created_at,
                source.updated_at,
                source.last_error,
            ],
        )
        .map_err(|e| map_unique_violation(e, "source", &source.name))?;
        Ok(())
    }

    pub fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, type, root_path, config_json, status, enabled, created_at, updated_at, last_error
             FROM sources WHERE id = ?1",
            params![id],
            row_to_source,
        )
        .optional()
        .map_err(CatalogError::from)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, type, root_path, config_json, status, enabled, created_at, updated_at, last_error
             FROM sources ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_source)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn delete_source(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

fn map_unique_violation(e: rusqlite::Error, kind: &str, name: &str) -> CatalogError {
    if let rusqlite::Error::SqliteFailure(ref f, _) = e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return CatalogError::conflict(format!("{kind} '{name}' already exists"));
        }
    }
    CatalogError::from(e)
}

fn source_type_str(t: SourceType) -> &'static str {
    match t {
        SourceType::Manual => "manual",
        SourceType::Live => "live",
        SourceType::Scheduled => "scheduled",
    }
}

fn source_status_str(s: SourceStatus) -> &'static str {
    match s {
        SourceStatus::Stopped => "stopped",
        SourceStatus::Starting => "starting",
        SourceStatus::Running => "running",
        SourceStatus::Stopping => "stopping",
        SourceStatus::Error => "error",
    }
}

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<Rule> {
    let cond_json: String = row.get(5)?;
    let outcome_json: String = row.get(6)?;
    let condition: RuleCondition = serde_json::from_str(&cond_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
    let outcome: RuleOutcome = serde_json::from_str(&outcome_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        enabled: row.get(3)?,
        priority: row.get(4)?,
        condition,
        outcome,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_artifact(row: &rusqlite::Row) -> rusqlite::Result<Artifact> {
    let meta_json: String = row.get(6)?;
    let metadata_json: serde_json::Value = serde_json::from_str(&meta_json).unwrap_or(serde_json::Value::Null);
    Ok(Artifact {
        hash: row.get(0)?,
        source_path: row.get(1)?,
        artifact_type: row.get(2)?,
        mime_type: row.get(3)?,
        cache_path: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        metadata_json,
        generator: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<Source> {
    let type_str: String = row.get(2)?;
    let status_str: String = row.get(5)?;
    let cfg_str: String = row.get(4)?;
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        source_type: match type_str.as_str() {
            "live" => SourceType::Live,
            "scheduled" => SourceType::Scheduled,
            _ => SourceType::Manual,
        },
        root_path: row.get(3)?,
        config_json: serde_json::from_str(&cfg_str).unwrap_or(serde_json::Value::Null),
        status: match status_str.as_str() {
            "starting" => SourceStatus::Starting,
            "running" => SourceStatus::Running,
            "stopping" => SourceStatus::Stopping,
            "error" => SourceStatus::Error,
            _ => SourceStatus::Stopped,
        },
        enabled: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        last_error: row.get(9)?,
    })
}

// ---------------------------------------------------------------------------
// Tree building
// ---------------------------------------------------------------------------

fn build_tree_node(
    conn: &Connection,
    path: &str,
    depth: usize,
    options: &TreeOptions,
    node_budget: &mut usize,
) -> Result<TreeNode> {
    let entry = conn
        .query_row(&format!("SELECT {ENTRY_COLS} FROM entries WHERE path = ?1"), params![path], row_to_entry)
        .optional()?
        .ok_or_else(|| CatalogError::not_found(format!("entry '{path}' not found")))?;

    if *node_budget == 0 {
        return Ok(TreeNode { path: entry.path, kind: entry.kind, size: entry.size, children: None, summary: None });
    }
    *node_budget -= 1;

    if entry.kind == EntryKind::File || depth >= options.max_depth {
        return Ok(TreeNode { path: entry.path, kind: entry.kind, size: entry.size, children: None, summary: None });
    }

    let mut stmt = conn.prepare(&format!("SELECT {ENTRY_COLS} FROM entries WHERE parent = ?1 ORDER BY path"))?;
    let mut children: Vec<Entry> = stmt
        .query_map(params![path], row_to_entry)?
        .collect::<rusqlite::Result<_>>()?;

    if let Some(min_t) = options.min_mtime {
        children.retain(|e| e.mtime >= min_t);
    }
    if let Some(max_t) = options.max_mtime {
        children.retain(|e| e.mtime <= max_t);
    }
    children.retain(|e| e.size >= options.min_size || e.kind == EntryKind::Directory);

    if children.len() > options.child_threshold || depth >= 5 {
        let file_count = children.iter().filter(|c| c.kind == EntryKind::File).count();
        let directory_count = children.len() - file_count;
        let total_size: u64 = children.iter().map(|c| c.size).sum();
        let mut by_size = children.clone();
        by_size.sort_by(|a, b| b.size.cmp(&a.size));
        let largest_children = by_size.into_iter().take(20).map(|c| (c.path, c.size)).collect();
        return Ok(TreeNode {
            path: entry.path,
            kind: entry.kind,
            size: entry.size,
            children: None,
            summary: Some(TreeSummary {
                total_children: children.len(),
                file_count,
                directory_count,
                total_size,
                largest_children,
            }),
        });
    }

    let mut out_children = Vec::with_capacity(children.len());
    for child in &children {
        if *node_budget == 0 {
            break;
        }
        out_children.push(build_tree_node(conn, &child.path, depth + 1, options, node_budget)?);
    }

    Ok(TreeNode { path: entry.path, kind: entry.kind, size: entry.size, children: Some(out_children), summary: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CatalogStore {
        CatalogStore::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_is_idempotent_keyed_by_path() {
        let s = store();
        s.upsert_entry("/a.txt", None, 10, EntryKind::File, 1, 1, 1).unwrap();
        let e = s.upsert_entry("/a.txt", None, 20, EntryKind::File, 1, 2, 2).unwrap();
        assert_eq!(e.size, 20);
        assert_eq!(s.by_time_range(0, 100, None).unwrap().len(), 1);
    }

    #[test]
    fn delete_cascades_to_descendants() {
        let s = store();
        s.upsert_entry("/d", None, 0, EntryKind::Directory, 1, 1, 1).unwrap();
        s.upsert_entry("/d/a.txt", Some("/d"), 1, EntryKind::File, 1, 1, 1).unwrap();
        s.upsert_entry("/d/b.txt", Some("/d"), 1, EntryKind::File, 1, 1, 1).unwrap();
        s.upsert_entry("/other.txt", None, 1, EntryKind::File, 1, 1, 1).unwrap();
        let n = s.delete_entry_cascade("/d").unwrap();
        assert_eq!(n, 3);
        assert!(s.get_entry("/d/a.txt").unwrap().is_none());
        assert!(s.get_entry("/other.txt").unwrap().is_some());
    }

    #[test]
    fn sweep_removes_stale_entries_under_root() {
        let s = store();
        s.upsert_entry("/r/a.txt", Some("/r"), 1, EntryKind::File, 1, 1, 1).unwrap();
        s.upsert_entry("/r/b.txt", Some("/r"), 1, EntryKind::File, 1, 1, 2).unwrap();
        let n = s.sweep("/r", 2).unwrap();
        assert_eq!(n, 1);
        assert!(s.get_entry("/r/a.txt").unwrap().is_none());
        assert!(s.get_entry("/r/b.txt").unwrap().is_some());
    }

    #[test]
    fn resource_set_rejects_cyclic_edge() {
        let s = store();
        s.create_resource_set("a", "", "manual").unwrap();
        s.create_resource_set("b", "", "manual").unwrap();
        s.link_resource_sets("a", "b").unwrap();
        let err = s.link_resource_sets("b", "a").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn unique_name_conflict_on_rule() {
        let s = store();
        let rule = Rule {
            id: 0,
            name: "r1".into(),
            description: String::new(),
            enabled: true,
            priority: 0,
            condition: RuleCondition::All { children: vec![] },
            outcome: RuleOutcome::Tool(ToolCall { tool: "selection_set.add".into(), args: Default::default() }),
            created_at: 0,
            updated_at: 0,
        };
        assert!(s.upsert_rule(&rule).unwrap_err().kind == crate::error::ErrorKind::InvalidArgument);
    }
}

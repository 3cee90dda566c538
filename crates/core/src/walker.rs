//! The Walker (C7): a parallel directory walk built on the `ignore`
//! crate, upserting every visited node and sweeping stale entries once
//! the walk completes.

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::rules::RuleEngine;
use crate::types::EntryKind;
use ignore::WalkBuilder;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct WalkConfig {
    pub respect_gitignore: bool,
    pub follow_hidden: bool,
    pub ignore_patterns: Vec<String>,
    pub threads: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self { respect_gitignore: false, follow_hidden: true, ignore_patterns: Vec::new(), threads: rayon::current_num_threads().min(12) }
    }
}

pub struct WalkStats {
    pub visited: usize,
    pub errors: usize,
    pub swept: usize,
}

/// Walk `root`, upserting each entry with the given `run_id`, then sweep
/// everything under `root` whose `last_scanned` predates `run_id`. When
/// `rules` is set, every upserted entry is run through the rule engine
/// immediately, the same way the teacher's `watch.rs` re-derives search
/// index state inline as files change rather than in a separate pass.
pub fn walk_and_catalog(
    store: &Arc<CatalogStore>,
    root: &Path,
    run_id: i64,
    config: &WalkConfig,
    rules: Option<&Arc<RuleEngine>>,
) -> Result<WalkStats> {
    let root_str = root.to_string_lossy().to_string();
    let visited = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let ignore_globs: Vec<glob::Pattern> = config
        .ignore_patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(!config.follow_hidden)
        .git_ignore(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .threads(config.threads.max(1));

    let ignore_globs = Arc::new(ignore_globs);
    {
        let ignore_globs = ignore_globs.clone();
        builder.filter_entry(move |entry| {
            let path = entry.path();
            !ignore_globs.iter().any(|g| g.matches_path(path))
        });
    }

    let walker = builder.build_parallel();
    let visited_clone = visited.clone();
    let errors_clone = errors.clone();
    let store_clone = store.clone();
    let rules_clone = rules.cloned();

    walker.run(move || {
        let store = store_clone.clone();
        let visited = visited_clone.clone();
        let errors = errors_clone.clone();
        let rules = rules_clone.clone();
        Box::new(move |result| {
            match result {
                Ok(dent) => {
                    let path = dent.path();
                    match catalog_one(&store, path, run_id) {
                        Ok(entry) => {
                            visited.fetch_add(1, Ordering::Relaxed);
                            if let Some(engine) = &rules {
                                if let Err(e) = engine.execute_for_path(&entry) {
                                    tracing::warn!(path = %path.display(), error = %e, "rule execution failed");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "failed to catalog entry");
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "walk entry error");
                    errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            ignore::WalkState::Continue
        })
    });

    let swept = store.sweep(&root_str, run_id)?;

    Ok(WalkStats {
        visited: visited.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
        swept,
    })
}

fn catalog_one(store: &CatalogStore, path: &Path, run_id: i64) -> Result<crate::types::Entry> {
    let meta = std::fs::symlink_metadata(path)?;
    let kind = if meta.is_dir() { EntryKind::Directory } else { EntryKind::File };
    let size = if kind == EntryKind::File { meta.len() } else { 0 };
    let mtime = system_time_to_epoch(meta.modified().ok());
    let ctime = system_time_to_epoch(meta.created().ok()).unwrap_or(mtime);
    let parent = path.parent().map(|p| p.to_string_lossy().to_string());

    store.upsert_entry(&path.to_string_lossy(), parent.as_deref(), size, kind, ctime, mtime, run_id)
}

fn system_time_to_epoch(t: Option<SystemTime>) -> i64 {
    t.and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Monotonic run-id source; one counter per process, shared across walks
/// and live-source rescans so sweeps never collide.
pub struct RunIdSource {
    next: AtomicI64,
}

impl RunIdSource {
    pub fn new() -> Self {
        let seed = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(1);
        Self { next: AtomicI64::new(seed) }
    }

    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RunIdSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_catalogs_files_and_sweeps_stale() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"hi").unwrap();

        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let stats = walk_and_catalog(&store, dir.path(), 1, &WalkConfig::default(), None).unwrap();
        assert!(stats.visited >= 3);
        assert_eq!(stats.swept, 0);

        std::fs::remove_file(dir.path().join("sub/b.txt")).unwrap();
        let stats2 = walk_and_catalog(&store, dir.path(), 2, &WalkConfig::default(), None).unwrap();
        assert!(stats2.swept >= 1);
        assert!(store.get_entry(&dir.path().join("sub/b.txt").to_string_lossy()).unwrap().is_none());
    }

    #[test]
    fn run_id_source_is_monotonic() {
        let src = RunIdSource::new();
        let a = src.next();
        let b = src.next();
        assert!(b > a);
    }
}

//! The Source Supervisor (C9): owns the set of configured sources and
//! their live watcher instances, guarded by a single mutex over the
//! source map (never held across a blocking watcher operation).

use crate::catalog::CatalogStore;
use crate::error::{CatalogError, Result};
use crate::rules::RuleEngine;
use crate::types::{LiveSourceConfig, Source, SourceStatus, SourceType};
use crate::walker::RunIdSource;
use crate::watch::LiveSource;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

struct Managed {
    source: Source,
    live: Option<Arc<LiveSource>>,
}

pub struct SourceSupervisor {
    store: Arc<CatalogStore>,
    run_ids: Arc<RunIdSource>,
    rules: Option<Arc<RuleEngine>>,
    sources: Mutex<HashMap<String, Managed>>,
}

impl SourceSupervisor {
    pub fn new(store: Arc<CatalogStore>, run_ids: Arc<RunIdSource>) -> Self {
        Self { store, run_ids, rules: None, sources: Mutex::new(HashMap::new()) }
    }

    pub fn with_rules(store: Arc<CatalogStore>, run_ids: Arc<RunIdSource>, rules: Arc<RuleEngine>) -> Self {
        Self { store, run_ids, rules: Some(rules), sources: Mutex::new(HashMap::new()) }
    }

    pub fn create(&self, name: &str, source_type: SourceType, root_path: &str, config_json: serde_json::Value) -> Result<Source> {
        let now = now();
        let source = Source {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            source_type,
            root_path: root_path.to_string(),
            config_json,
            status: SourceStatus::Stopped,
            enabled: true,
            created_at: now,
            updated_at: now,
            last_error: None,
        };
        self.store.upsert_source(&source)?;
        self.sources.lock().unwrap().insert(source.id.clone(), Managed { source: source.clone(), live: None });
        Ok(source)
    }

    pub fn get(&self, id: &str) -> Result<Option<Source>> {
        let guard = self.sources.lock().unwrap();
        Ok(guard.get(id).map(|m| m.source.clone()))
    }

    pub fn list(&self) -> Vec<Source> {
        let guard = self.sources.lock().unwrap();
        guard.values().map(|m| m.source.clone()).collect()
    }

    /// Update the mutable fields of an existing source. `None` leaves a
    /// field unchanged. A running source is left running; the new
    /// `root_path`/`config_json` only take effect on the next `start`.
    pub fn update(
        &self,
        id: &str,
        name: Option<&str>,
        root_path: Option<&str>,
        config_json: Option<serde_json::Value>,
        enabled: Option<bool>,
    ) -> Result<Source> {
        let mut guard = self.sources.lock().unwrap();
        let managed = guard.get_mut(id).ok_or_else(|| CatalogError::not_found(format!("source '{id}' not found")))?;
        if let Some(name) = name {
            managed.source.name = name.to_string();
        }
        if let Some(root_path) = root_path {
            managed.source.root_path = root_path.to_string();
        }
        if let Some(config_json) = config_json {
            managed.source.config_json = config_json;
        }
        if let Some(enabled) = enabled {
            managed.source.enabled = enabled;
        }
        managed.source.updated_at = now();
        let updated = managed.source.clone();
        drop(guard);
        self.store.upsert_source(&updated)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.stop(id)?;
        let mut guard = self.sources.lock().unwrap();
        let existed = guard.remove(id).is_some();
        drop(guard);
        self.store.delete_source(id)?;
        Ok(existed)
    }

    /// Start the live watcher for a source, if it's of type `live`.
    pub fn start(&self, id: &str) -> Result<()> {
        let (root, cfg_json, kind) = {
            let guard = self.sources.lock().unwrap();
            let managed = guard.get(id).ok_or_else(|| CatalogError::not_found(format!("source '{id}' not found")))?;
            (PathBuf::from(&managed.source.root_path), managed.source.config_json.clone(), managed.source.source_type)
        };

        if kind != SourceType::Live {
            return Err(CatalogError::invalid("only 'live' sources can be started"));
        }

        let live_config: LiveSourceConfig = serde_json::from_value(cfg_json).unwrap_or_default();
        let live = Arc::new(LiveSource::with_rules(root, live_config, self.store.clone(), self.run_ids.clone(), self.rules.clone()));

        // Start without holding the map lock: attaching a watcher touches the
        // filesystem and can block briefly on the initial scan.
        let start_result = live.start();

        let mut guard = self.sources.lock().unwrap();
        let managed = guard.get_mut(id).ok_or_else(|| CatalogError::not_found(format!("source '{id}' not found")))?;
        match &start_result {
            Ok(()) => {
                managed.source.status = SourceStatus::Running;
                managed.source.last_error = None;
            }
            Err(e) => {
                managed.source.status = SourceStatus::Error;
                managed.source.last_error = Some(e.message.clone());
            }
        }
        managed.source.updated_at = now();
        let updated = managed.source.clone();
        managed.live = Some(live);
        drop(guard);
        self.store.upsert_source(&updated)?;
        start_result
    }

    pub fn stop(&self, id: &str) -> Result<()> {
        let live = {
            let guard = self.sources.lock().unwrap();
            guard.get(id).and_then(|m| m.live.clone())
        };
        if let Some(live) = live {
            live.stop()?;
        }
        let mut guard = self.sources.lock().unwrap();
        if let Some(managed) = guard.get_mut(id) {
            managed.source.status = SourceStatus::Stopped;
            managed.source.updated_at = now();
            let updated = managed.source.clone();
            managed.live = None;
            drop(guard);
            self.store.upsert_source(&updated)?;
        }
        Ok(())
    }

    pub fn stop_all(&self) -> Result<()> {
        let ids: Vec<String> = self.sources.lock().unwrap().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id) {
                tracing::warn!(source = %id, error = %e, "failed to stop source during shutdown");
            }
        }
        Ok(())
    }

    pub fn stats(&self, id: &str) -> Result<SourceStats> {
        let guard = self.sources.lock().unwrap();
        let managed = guard.get(id).ok_or_else(|| CatalogError::not_found(format!("source '{id}' not found")))?;
        let dropped_events = managed.live.as_ref().map(|l| l.dropped_event_count()).unwrap_or(0);
        Ok(SourceStats { status: managed.source.status, dropped_events })
    }

    /// Restart every enabled `live` source, regardless of the status it was
    /// persisted with, called once at process startup. A source's
    /// `running`/`error`/`stopped` status reflects its state at last
    /// shutdown, not whether it should run now — that's governed by `enabled`.
    pub fn restore_active(&self) -> Result<()> {
        let persisted = self.store.list_sources()?;
        for source in persisted {
            if source.enabled && source.source_type == SourceType::Live {
                self.sources.lock().unwrap().insert(source.id.clone(), Managed { source: source.clone(), live: None });
                if let Err(e) = self.start(&source.id) {
                    tracing::warn!(source = %source.id, error = %e, "failed to restore active source");
                }
            } else {
                self.sources.lock().unwrap().insert(source.id.clone(), Managed { source, live: None });
            }
        }
        Ok(())
    }
}

pub struct SourceStats {
    pub status: SourceStatus,
    pub dropped_events: u64,
}

fn now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_start_stop_live_source() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let run_ids = Arc::new(RunIdSource::new());
        let supervisor = SourceSupervisor::new(store, run_ids);
        let dir = tempfile::tempdir().unwrap();
        let source = supervisor
            .create("watch1", SourceType::Live, &dir.path().to_string_lossy(), serde_json::json!({}))
            .unwrap();
        supervisor.start(&source.id).unwrap();
        assert_eq!(supervisor.get(&source.id).unwrap().unwrap().status, SourceStatus::Running);
        supervisor.stop(&source.id).unwrap();
        assert_eq!(supervisor.get(&source.id).unwrap().unwrap().status, SourceStatus::Stopped);
    }

    #[test]
    fn manual_sources_cannot_be_started() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let run_ids = Arc::new(RunIdSource::new());
        let supervisor = SourceSupervisor::new(store, run_ids);
        let source = supervisor.create("s", SourceType::Manual, "/tmp", serde_json::json!({})).unwrap();
        assert!(supervisor.start(&source.id).is_err());
    }

    #[test]
    fn update_changes_name_and_root_path() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let run_ids = Arc::new(RunIdSource::new());
        let supervisor = SourceSupervisor::new(store, run_ids);
        let source = supervisor.create("watch1", SourceType::Manual, "/tmp/a", serde_json::json!({})).unwrap();

        let updated = supervisor.update(&source.id, Some("watch1-renamed"), Some("/tmp/b"), None, Some(false)).unwrap();
        assert_eq!(updated.name, "watch1-renamed");
        assert_eq!(updated.root_path, "/tmp/b");
        assert!(!updated.enabled);

        let fetched = supervisor.get(&source.id).unwrap().unwrap();
        assert_eq!(fetched.root_path, "/tmp/b");
    }

    #[test]
    fn restore_active_restarts_enabled_live_sources_regardless_of_persisted_status() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let run_ids = Arc::new(RunIdSource::new());
        let dir = tempfile::tempdir().unwrap();
        let mut source = Source {
            id: "restore-me".to_string(),
            name: "watch1".to_string(),
            source_type: SourceType::Live,
            root_path: dir.path().to_string_lossy().to_string(),
            config_json: serde_json::json!({}),
            status: SourceStatus::Stopped,
            enabled: true,
            created_at: 0,
            updated_at: 0,
            last_error: None,
        };
        store.upsert_source(&source).unwrap();
        source.status = SourceStatus::Error;
        store.upsert_source(&source).unwrap();

        let supervisor = SourceSupervisor::new(store, run_ids);
        supervisor.restore_active().unwrap();
        assert_eq!(supervisor.get("restore-me").unwrap().unwrap().status, SourceStatus::Running);
        supervisor.stop_all().unwrap();
    }
}

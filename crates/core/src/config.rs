//! The Config Layer (C12): defaults < `.catalog.toml` < environment
//! variables < CLI flags, resolved once into a plain struct and handed
//! down by reference (no global mutable config, matching the teacher's
//! explicit-constructor-injection style).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// `MCP_HOME` takes precedence over `MCP_SPACE_BROWSER_HOME`; both are
/// overridden by an explicit `--home` CLI flag if the caller sets one.
pub fn resolve_home_dir(cli_override: Option<&str>) -> PathBuf {
    if let Some(p) = cli_override {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("MCP_HOME") {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("MCP_SPACE_BROWSER_HOME") {
        return PathBuf::from(p);
    }
    dirs_fallback()
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(".")).join(".catalog")
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub catalog_db: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub default_ignore_patterns: Vec<String>,
    #[serde(default)]
    pub batch_workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub home: PathBuf,
    pub catalog_db: PathBuf,
    pub cache_dir: PathBuf,
    pub log_level: String,
    pub default_ignore_patterns: Vec<String>,
    pub batch_workers: usize,
}

pub struct ConfigOverrides {
    pub home: Option<String>,
    pub catalog_db: Option<String>,
    pub cache_dir: Option<String>,
    pub log_level: Option<String>,
    pub batch_workers: Option<usize>,
}

impl Default for ConfigOverrides {
    fn default() -> Self {
        Self { home: None, catalog_db: None, cache_dir: None, log_level: None, batch_workers: None }
    }
}

/// Load `.catalog.toml` from `home` if present, layer environment
/// variables, then CLI overrides, and resolve to concrete paths.
pub fn load(home_hint: Option<&str>, overrides: ConfigOverrides) -> ResolvedConfig {
    let home = resolve_home_dir(overrides.home.as_deref().or(home_hint));

    let file_config: FileConfig = std::fs::read_to_string(home.join(".catalog.toml"))
        .ok()
        .and_then(|s| toml::from_str(&s).ok())
        .unwrap_or_default();

    let catalog_db = overrides
        .catalog_db
        .or_else(|| std::env::var("CATALOG_DB_PATH").ok())
        .or(file_config.catalog_db)
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join("catalog.sqlite3"));

    let cache_dir = overrides
        .cache_dir
        .or_else(|| std::env::var("CATALOG_CACHE_DIR").ok())
        .or(file_config.cache_dir)
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join("cache"));

    let log_level = overrides
        .log_level
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .or(file_config.log_level)
        .unwrap_or_else(|| "info".to_string());

    let batch_workers = overrides
        .batch_workers
        .or_else(|| std::env::var("CATALOG_BATCH_WORKERS").ok().and_then(|s| s.parse().ok()))
        .or(file_config.batch_workers)
        .unwrap_or_else(num_cpus);

    ResolvedConfig {
        home,
        catalog_db,
        cache_dir,
        log_level,
        default_ignore_patterns: file_config.default_ignore_patterns,
        batch_workers,
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

pub fn exists_writable(dir: &Path) -> bool {
    std::fs::create_dir_all(dir).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_home_wins_over_space_browser_home() {
        std::env::set_var("MCP_HOME", "/from/mcp_home");
        std::env::set_var("MCP_SPACE_BROWSER_HOME", "/from/space_browser_home");
        assert_eq!(resolve_home_dir(None), PathBuf::from("/from/mcp_home"));
        std::env::remove_var("MCP_HOME");
        std::env::remove_var("MCP_SPACE_BROWSER_HOME");
    }

    #[test]
    fn cli_override_wins_over_everything() {
        std::env::set_var("MCP_HOME", "/from/mcp_home");
        assert_eq!(resolve_home_dir(Some("/from/cli")), PathBuf::from("/from/cli"));
        std::env::remove_var("MCP_HOME");
    }
}

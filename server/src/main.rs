use catalog_core::batch::run_batch;
use catalog_core::cache::ArtifactCache;
use catalog_core::catalog::{CatalogStore, ResourceSearchParams};
use catalog_core::classifier::ClassifierRegistry;
use catalog_core::config::{self, ConfigOverrides};
use catalog_core::metadata::MetadataExtractorRegistry;
use catalog_core::processor::Processor;
use catalog_core::rules::RuleEngine;
use catalog_core::supervisor::SourceSupervisor;
use catalog_core::types::{infer_media_type, EntryKind, MediaType};
use catalog_core::walker::{walk_and_catalog, RunIdSource, WalkConfig};
use catalog_mcp::{run_mcp, McpContext};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;

#[derive(Parser)]
#[command(name = "catalog-server", about = "Filesystem catalog, rule engine, and classifier pipeline")]
struct Cli {
    /// Override the resolved home directory (takes precedence over MCP_HOME / MCP_SPACE_BROWSER_HOME)
    #[arg(long, global = true)]
    home: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog store and cache directory at the resolved home
    Init,
    /// Run the MCP tool facade over stdio
    Mcp,
    /// Run the HTTP surface (health + read-only catalog endpoints)
    Serve {
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: String,
    },
    /// One-shot recursive scan of a directory into the catalog
    Scan {
        path: String,
        #[arg(long)]
        respect_gitignore: bool,
    },
    /// Worker-pool bulk thumbnail generation over every image/video entry under a root
    Thumbnails {
        root: String,
        /// Defaults to the resolved config's batch_workers (env CATALOG_BATCH_WORKERS, or available parallelism)
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct AppContext {
    store: Arc<CatalogStore>,
    processor: Arc<Processor>,
    rules: Arc<RuleEngine>,
    supervisor: Arc<SourceSupervisor>,
}

fn build_app(resolved: &config::ResolvedConfig) -> catalog_core::error::Result<AppContext> {
    std::fs::create_dir_all(&resolved.home)?;
    let store = Arc::new(CatalogStore::open(&resolved.catalog_db)?);
    let cache = Arc::new(ArtifactCache::new(&resolved.cache_dir));
    let classifiers = Arc::new(ClassifierRegistry::new());
    let extractors = Arc::new(MetadataExtractorRegistry::new());
    let processor = Arc::new(Processor::new(store.clone(), cache, classifiers, extractors));
    let rules = Arc::new(RuleEngine::new(store.clone()));
    let run_ids = Arc::new(RunIdSource::new());
    let supervisor = Arc::new(SourceSupervisor::with_rules(store.clone(), run_ids, rules.clone()));
    supervisor.restore_active()?;
    Ok(AppContext { store, processor, rules, supervisor })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let resolved = config::load(cli.home.as_deref(), ConfigOverrides::default());
    init_tracing(&resolved.log_level);

    let result = match &cli.command {
        Commands::Init => run_init(&resolved),
        Commands::Scan { path, respect_gitignore } => run_scan(&resolved, path, *respect_gitignore),
        Commands::Thumbnails { root, workers } => run_thumbnails(&resolved, root, workers.unwrap_or(resolved.batch_workers)),
        Commands::Mcp => run_mcp_command(&resolved),
        Commands::Serve { addr } => run_serve(&resolved, addr),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run_init(resolved: &config::ResolvedConfig) -> catalog_core::error::Result<()> {
    std::fs::create_dir_all(&resolved.home)?;
    let _store = CatalogStore::open(&resolved.catalog_db)?;
    config::exists_writable(&resolved.cache_dir);
    tracing::info!(home = %resolved.home.display(), db = %resolved.catalog_db.display(), "initialized catalog home");
    Ok(())
}

fn run_scan(resolved: &config::ResolvedConfig, path: &str, respect_gitignore: bool) -> catalog_core::error::Result<()> {
    let app = build_app(resolved)?;
    let run_ids = RunIdSource::new();
    let run_id = run_ids.next();
    let stats = walk_and_catalog(
        &app.store,
        std::path::Path::new(path),
        run_id,
        &WalkConfig { respect_gitignore, ignore_patterns: resolved.default_ignore_patterns.clone(), ..WalkConfig::default() },
        Some(&app.rules),
    )?;
    tracing::info!(visited = stats.visited, errors = stats.errors, swept = stats.swept, "scan complete");
    Ok(())
}

/// Bulk-generate thumbnails for every cataloged image/video entry under
/// `root`, using the worker-pool batch runner rather than one call per
/// resource.
fn run_thumbnails(resolved: &config::ResolvedConfig, root: &str, workers: usize) -> catalog_core::error::Result<()> {
    let app = build_app(resolved)?;
    let params = ResourceSearchParams {
        kind: Some(EntryKind::File),
        path_substring: Some(root.to_string()),
        limit: i64::MAX,
        ..Default::default()
    };
    let entries = app.store.resource_search(&params)?;
    let targets: Vec<(String, i64)> = entries
        .into_iter()
        .filter(|e| matches!(infer_media_type(&e.path), Some(MediaType::Image) | Some(MediaType::Video)))
        .map(|e| (e.path, e.mtime))
        .collect();

    tracing::info!(root, count = targets.len(), workers, "starting thumbnail batch");
    let processor = app.processor.clone();
    let summary = run_batch(
        targets,
        workers,
        move |(path, mtime)| match processor.process_thumbnail(&path, mtime) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(path, error = %e, "thumbnail generation failed");
                false
            }
        },
        |progress| {
            tracing::info!(
                processed = progress.processed,
                total = progress.total,
                throughput = progress.throughput_per_sec,
                eta_seconds = progress.eta_seconds,
                "thumbnail batch progress"
            );
        },
    );
    tracing::info!(processed = summary.processed, succeeded = summary.succeeded, failed = summary.failed, "thumbnail batch complete");
    Ok(())
}

fn run_mcp_command(resolved: &config::ResolvedConfig) -> catalog_core::error::Result<()> {
    let app = build_app(resolved)?;
    let ctx = McpContext::new(catalog_mcp::tools_context(app.store, app.processor, app.rules, app.supervisor));
    run_mcp(ctx).map_err(catalog_core::error::CatalogError::from)
}

fn run_serve(resolved: &config::ResolvedConfig, addr: &str) -> catalog_core::error::Result<()> {
    let app = build_app(resolved)?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| catalog_core::error::CatalogError::internal(e.to_string()))?;

    rt.block_on(async move {
        let router = api::build_router(app.store.clone());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| catalog_core::error::CatalogError::unavailable(format!("bind {addr} failed: {e}")))?;
        tracing::info!(%addr, "catalog-server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| catalog_core::error::CatalogError::internal(e.to_string()))?;
        app.supervisor.stop_all()
    })
}

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dfs_cache::cache::disk::FsBackend;
use dfs_cache::cache::{ContinuationCoordinator, FileSystemLruCache, ManagedFileContext};
use dfs_cache::config::Config;
use dfs_cache::dfs::{LocalDirAdaptor, NamenodeRegistry, PathResolver};
use dfs_cache::metrics::export_prometheus;
use dfs_cache::sync::{CacheManager, SyncModule};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// dfs-cache - local LRU cache of files from distributed filesystems
#[derive(Parser, Debug)]
#[command(name = "dfs-cache")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Rebuild the index from the cache directory before running the command
    #[arg(long)]
    reload: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch files given as schema://host:port/path into the cache
    Fetch {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print cache statistics and prometheus metrics
    Stats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    dfs_cache::logging::init_subscriber(&config.logging)
        .map_err(|e| anyhow!("Failed to initialize logging subsystem: {}", e))?;

    info!(
        config_file = %args.config.display(),
        cache_root = %config.cache.root,
        capacity_mb = config.cache.capacity_mb,
        filesystems = config.filesystems.len(),
        "Configuration loaded successfully"
    );

    // Downloads run on the runtime; cache calls block on this thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let registry = Arc::new(NamenodeRegistry::new());
    for filesystem in &config.filesystems {
        registry.configure_filesystem(
            filesystem.descriptor(),
            Arc::new(LocalDirAdaptor::new(&filesystem.remote_root)),
            filesystem.max_connections,
        );
    }

    let resolver = Arc::new(PathResolver::new(config.cache.root_path()));
    let sync = Arc::new(SyncModule::new(
        registry,
        resolver.clone(),
        config.sync.chunk_size_bytes,
        config.sync.estimated_throughput_bytes_per_sec,
    ));
    let manager = Arc::new(CacheManager::new(
        runtime.handle().clone(),
        sync,
        config.sync.download_concurrency,
    ));

    let ctx = ManagedFileContext {
        resolver: resolver.clone(),
        backend: Arc::new(FsBackend::new()),
        min_resync_interval: config.cache.resync_interval(),
    };
    let cache = FileSystemLruCache::new(
        ctx,
        ContinuationCoordinator::new(manager),
        config.cache.capacity_bytes(),
        config.cache.autoload,
    );

    if args.reload {
        let files = cache.reload().context("Failed to reload cache index")?;
        info!(files = files, "Cache index rebuilt");
    }

    match args.command {
        Command::Fetch { paths } => {
            let mut failures = 0usize;
            for network_path in &paths {
                let local = resolver
                    .local_path_for_network(network_path)
                    .with_context(|| format!("Invalid network path '{}'", network_path))?;
                match cache.acquire(&local) {
                    Ok(handle) => println!(
                        "{} -> {} ({} bytes)",
                        network_path,
                        handle.path().display(),
                        handle.file().size()
                    ),
                    Err(e) => {
                        error!(
                            network_path = %network_path,
                            category = e.category().as_str(),
                            error = %e,
                            "Fetch failed"
                        );
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} file(s) could not be fetched", failures, paths.len());
            }
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
            print!("{}", export_prometheus());
        }
    }

    Ok(())
}

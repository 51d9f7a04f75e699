mod auth;
mod config;
mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chunk_store::metadata::{LruMetadataCache, MetadataService, SqliteStore};
use chunk_store::pool::TaskPool;
use chunk_store::storage::{BlobStore, DiskBlobStore};
use chunk_store::ChunkUploadService;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::TokenTable;
use crate::config::ServerConfig;
use crate::routes::AppState;

#[derive(Parser)]
#[command(name = "api_server")]
#[command(about = "Chunked upload API server", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "chunkstore.toml")]
    config: PathBuf,
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("chunk_store api_server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load(&args.config)?;

    let blobs: Arc<dyn BlobStore> = Arc::new(
        DiskBlobStore::new(&config.storage_root)
            .await
            .context("failed to initialize blob store")?,
    );
    blobs
        .health_check()
        .await
        .context("blob store health check failed")?;
    tracing::info!(root = %config.storage_root.display(), "Blob store ready");

    let store = Arc::new(
        SqliteStore::new(&config.database_path)
            .await
            .context("failed to open metadata database")?,
    );
    let cache = Arc::new(LruMetadataCache::new(
        config.upload.cache_capacity,
        config.upload.cache_ttl(),
    ));
    let metadata = MetadataService::new(store, cache);
    tracing::info!(database = %config.database_path.display(), "Metadata store ready");

    let workers = Arc::new(TaskPool::new(
        config.upload.worker_count,
        config.upload.queue_capacity,
    ));
    workers.start().map_err(|e| anyhow!("failed to start task pool: {}", e))?;

    let uploads = ChunkUploadService::new(metadata, Arc::clone(&blobs), Arc::clone(&workers), &config.upload);
    let state = AppState {
        uploads: Arc::new(uploads),
        blobs,
        max_chunk_bytes: config.max_chunk_bytes,
    };

    let figment = rocket::Config::figment()
        .merge(("address", config.address.clone()))
        .merge(("port", config.port));

    let launched = routes::build(figment, state, TokenTable::new(&config.tokens))
        .launch()
        .await;

    tracing::info!("Server stopped, draining task pool");
    workers.shutdown().await;

    launched.map_err(|e| anyhow!("server error: {}", e))?;
    Ok(())
}

use anyhow::{Context, Result};
use axum::Router;
use item_store::{
    AppState,
    config::{AppConfig, BackendKind},
    routes,
    services::{
        auth::AuthClient, backend::ObjectBackend, disk_backend::DiskBackend,
        item_store::ItemStore, memory_backend::MemoryBackend,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting item-store with config: {:?}", cfg);

    // --- Initialize backend ---
    let backend: Arc<dyn ObjectBackend> = match cfg.backend {
        BackendKind::Disk => {
            let disk = open_disk_backend(&cfg).await?;
            disk.migrate().await.context("applying schema")?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(());
            }
            Arc::new(disk)
        }
        BackendKind::Memory => {
            if migrate {
                tracing::warn!("--migrate has no effect with the memory backend");
                return Ok(());
            }
            tracing::warn!("Using the memory backend; items are lost on exit");
            Arc::new(MemoryBackend::new(cfg.bucket.clone()))
        }
    };

    // --- Initialize core services ---
    let store = ItemStore::new(backend)
        .with_list_max_items(cfg.list_max_items)
        .with_fetch_concurrency(cfg.fetch_concurrency);
    let auth = AuthClient::new(cfg.auth_api_url.clone(), cfg.auth_timeout)
        .context("building auth client")?;
    if !cfg.auth_enabled {
        tracing::warn!("Token validation disabled; item routes run tenantless");
    }
    let state = AppState::new(store, auth, cfg.auth_enabled, cfg.required_fields.clone());

    // --- Build router ---
    let app: Router = routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Prepare directories and the SQLite pool behind a [`DiskBackend`].
async fn open_disk_backend(cfg: &AppConfig) -> Result<DiskBackend> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);

    // Create parent directory if needed
    let db_path = options.get_filename();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Interpreted SQLite path => {}", db_path.display());

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    Ok(DiskBackend::new(
        Arc::new(db),
        cfg.storage_dir.clone(),
        cfg.bucket.clone(),
    )?)
}

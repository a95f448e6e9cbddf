use anyhow::Result;
use axum::Router;
use object_gateway::{
    config::{self, Backend},
    routes,
    services::{
        memory_store::MemoryObjectStore, object_store::ObjectStore,
        storage_service::StorageService,
    },
    state::AppState,
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
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-gateway with config: {:?}", cfg);

    // --- Initialize the object store ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Memory => {
            if migrate {
                anyhow::bail!("--migrate requires the sqlite backend");
            }
            tracing::warn!("Using the in-memory store; objects are lost on restart");
            Arc::new(MemoryObjectStore::new())
        }
        Backend::Sqlite => {
            let storage = open_sqlite_store(&cfg).await?;

            // --- Handle migration mode ---
            if migrate {
                storage.migrate().await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(storage)
        }
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(AppState::new(store, cfg.gateway.clone()));

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

/// Prepare the storage directory and the SQLite database behind it.
async fn open_sqlite_store(cfg: &config::AppConfig) -> Result<StorageService> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    Ok(StorageService::new(db, cfg.storage_dir.clone()))
}

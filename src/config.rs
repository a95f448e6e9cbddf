use crate::models::upload::MaxSize;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr, time::Duration};

const DEFAULT_VIDEO_CHUNK: u64 = 5 * 1024 * 1024;
const DEFAULT_VIDEO_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Which `ObjectStore` implementation backs the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite metadata plus payloads on local disk.
    Sqlite,
    /// Volatile in-process store.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub gateway: GatewaySettings,
}

/// Settings the controllers read at request time. Passed explicitly into
/// the router state.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Window served for open-ended video ranges (`bytes=N-`).
    pub video_chunk_size: u64,
    /// Server-side limit on one video response.
    pub video_timeout: Duration,
    /// Origins echoed in `Access-Control-Allow-Origin`; `*` echoes any.
    pub allowed_origins: Vec<String>,
    /// 0 stores archive entries, 1–9 deflates them.
    pub archive_compression_level: u32,
    /// Archive entries fetched at the same time.
    pub archive_fetch_concurrency: usize,
    /// Max-age used when a file request asks for caching without a value.
    pub default_cache_max_age: Duration,
    pub upload_max_size: MaxSize,
    /// Prefix of the `location` reported for uploaded objects.
    pub public_base_path: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            video_chunk_size: DEFAULT_VIDEO_CHUNK,
            video_timeout: DEFAULT_VIDEO_TIMEOUT,
            allowed_origins: Vec::new(),
            archive_compression_level: 6,
            archive_fetch_concurrency: 8,
            default_cache_max_age: DEFAULT_CACHE_MAX_AGE,
            upload_max_size: MaxSize::unlimited(),
            public_base_path: "/files".into(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming and upload gateway over an object store")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides OBJECT_GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory where objects are stored (overrides OBJECT_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bytes served for open-ended video ranges (overrides OBJECT_GATEWAY_VIDEO_CHUNK_SIZE)
    #[arg(long)]
    pub video_chunk_size: Option<u64>,

    /// Video response timeout, e.g. `30s` (overrides OBJECT_GATEWAY_VIDEO_TIMEOUT)
    #[arg(long)]
    pub video_timeout: Option<String>,

    /// Comma-separated CORS origins (overrides OBJECT_GATEWAY_ALLOWED_ORIGINS)
    #[arg(long)]
    pub allowed_origins: Option<String>,

    /// Archive compression level 0-9 (overrides OBJECT_GATEWAY_ARCHIVE_LEVEL)
    #[arg(long)]
    pub archive_level: Option<u32>,

    /// Parallel archive fetches (overrides OBJECT_GATEWAY_ARCHIVE_CONCURRENCY)
    #[arg(long)]
    pub archive_concurrency: Option<usize>,

    /// Default Cache-Control max-age, e.g. `1h` (overrides OBJECT_GATEWAY_CACHE_MAX_AGE)
    #[arg(long)]
    pub cache_max_age: Option<String>,

    /// Max upload size, e.g. `10GB` (overrides OBJECT_GATEWAY_UPLOAD_MAX_SIZE)
    #[arg(long)]
    pub upload_max_size: Option<String>,

    /// Path prefix for upload locations (overrides OBJECT_GATEWAY_PUBLIC_BASE_PATH)
    #[arg(long)]
    pub public_base_path: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed CLI args over the environment over defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let defaults = GatewaySettings::default();

        // --- Environment fallback ---
        let env_host = env::var("OBJECT_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("OBJECT_GATEWAY_PORT")?.unwrap_or(3000);
        let env_backend = env_parsed("OBJECT_GATEWAY_BACKEND")?.unwrap_or(Backend::Sqlite);
        let env_storage =
            env::var("OBJECT_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("OBJECT_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_gateway.db".into());

        let video_chunk_size = match args.video_chunk_size {
            Some(size) => size,
            None => env_parsed("OBJECT_GATEWAY_VIDEO_CHUNK_SIZE")?
                .unwrap_or(defaults.video_chunk_size),
        };
        let video_timeout = match pick(args.video_timeout, "OBJECT_GATEWAY_VIDEO_TIMEOUT") {
            Some(raw) => humantime::parse_duration(&raw)
                .with_context(|| format!("parsing video timeout `{}`", raw))?,
            None => defaults.video_timeout,
        };
        let allowed_origins = pick(args.allowed_origins, "OBJECT_GATEWAY_ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        let archive_compression_level = match args.archive_level {
            Some(level) => level,
            None => env_parsed("OBJECT_GATEWAY_ARCHIVE_LEVEL")?
                .unwrap_or(defaults.archive_compression_level),
        };
        if archive_compression_level > 9 {
            anyhow::bail!(
                "archive compression level must be 0-9, got {}",
                archive_compression_level
            );
        }
        let archive_fetch_concurrency = match args.archive_concurrency {
            Some(n) => n,
            None => env_parsed("OBJECT_GATEWAY_ARCHIVE_CONCURRENCY")?
                .unwrap_or(defaults.archive_fetch_concurrency),
        }
        .max(1);
        let default_cache_max_age = match pick(args.cache_max_age, "OBJECT_GATEWAY_CACHE_MAX_AGE") {
            Some(raw) => crate::services::content::parse_max_age(&raw)
                .with_context(|| format!("parsing cache max-age `{}`", raw))?,
            None => defaults.default_cache_max_age,
        };
        let upload_max_size = pick(args.upload_max_size, "OBJECT_GATEWAY_UPLOAD_MAX_SIZE")
            .map(|raw| MaxSize::parse(&raw))
            .unwrap_or(defaults.upload_max_size);
        let public_base_path = pick(args.public_base_path, "OBJECT_GATEWAY_PUBLIC_BASE_PATH")
            .unwrap_or(defaults.public_base_path);

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            gateway: GatewaySettings {
                video_chunk_size,
                video_timeout,
                allowed_origins,
                archive_compression_level,
                archive_fetch_concurrency,
                default_cache_max_age,
                upload_max_size,
                public_base_path,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value if given, else the environment variable.
fn pick(cli: Option<String>, var: &str) -> Option<String> {
    cli.or_else(|| env::var(var).ok())
}

/// Read and parse an optional environment variable.
fn env_parsed<T>(var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", var, value, err)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", var)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    handlers::{create_secret, health, reveal_secret},
    store::{crypto, Limits, Store},
    AppState,
};

const DB_FILE: &str = "lastsecret.db";
const KEY_FILE: &str = "lastsecret.key";

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// How often the reaper sweeps expired secrets.
    pub sweep_interval: Duration,
    /// Comma-separated allowed origins; None allows any origin.
    pub cors_origins: Option<String>,
    pub limits: Limits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            host: std::env::var("LASTSECRET_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("LASTSECRET_PORT", 8080),
            data_dir: std::env::var("LASTSECRET_DATA_DIR").ok().map(PathBuf::from),
            sweep_interval: Duration::from_secs(env_or("LASTSECRET_SWEEP_INTERVAL_SECS", 60)),
            cors_origins: std::env::var("LASTSECRET_CORS_ORIGINS").ok(),
            limits: Limits {
                max_secret_bytes: env_or("LASTSECRET_MAX_SECRET_BYTES", limits.max_secret_bytes),
                max_ttl_seconds: env_or("LASTSECRET_MAX_TTL_SECS", limits.max_ttl_seconds),
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Resolve the data directory, creating it if needed.
/// An explicit directory wins over the platform default.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Build the HTTP router around `state`.
pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/secrets", post(create_secret))
        .route("/api/secrets/{id}/reveal", post(reveal_secret))
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    if cfg.sweep_interval.is_zero() {
        anyhow::bail!("sweep interval must be greater than zero");
    }

    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let enc_key = load_or_create_key(&data_dir)?;
    let store = Store::open(&data_dir.join(DB_FILE), enc_key)
        .context("open store")?
        .with_limits(cfg.limits);

    let stored = store.count().context("count stored secrets")?;
    info!(
        stored,
        max_secret_bytes = cfg.limits.max_secret_bytes,
        max_ttl_seconds = cfg.limits.max_ttl_seconds,
        "store ready"
    );

    crate::reaper::spawn(store.clone(), cfg.sweep_interval);

    let app = router(AppState::new(store), cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "lastsecret server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn load_or_create_key(data_dir: &Path) -> Result<crypto::EncryptionKey> {
    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("read lastsecret.key")?;
        crypto::load_key(&bytes).ok_or_else(|| {
            anyhow::anyhow!(
                "lastsecret.key is corrupt (expected {} bytes, got {})",
                crypto::KEY_LEN,
                bytes.len()
            )
        })
    } else {
        let key = crypto::generate_key();
        std::fs::write(&key_path, key.as_bytes()).context("write lastsecret.key")?;
        info!("generated new encryption key");
        Ok(key)
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<HeaderValue> =
                o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

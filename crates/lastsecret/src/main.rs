use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lastsecret_server::ServerConfig;
use tracing_subscriber::EnvFilter;

/// Flags override the matching `LASTSECRET_*` environment variables.
#[derive(Parser)]
#[command(
    name = "lastsecret",
    about = "LastSecret: share a secret once, then it is gone",
    version
)]
struct Cli {
    /// Host to bind (default: $LASTSECRET_HOST or 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (default: $LASTSECRET_PORT or 8080)
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding lastsecret.db and lastsecret.key
    /// (default: $LASTSECRET_DATA_DIR or the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between expiry sweeps (default: $LASTSECRET_SWEEP_INTERVAL_SECS or 60)
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Comma-separated allowed CORS origins (default: $LASTSECRET_CORS_ORIGINS or any)
    #[arg(long)]
    cors_origins: Option<String>,

    /// Largest accepted secret in bytes (default: $LASTSECRET_MAX_SECRET_BYTES or 20000)
    #[arg(long)]
    max_secret_bytes: Option<usize>,

    /// Longest accepted TTL in seconds (default: $LASTSECRET_MAX_TTL_SECS or 604800)
    #[arg(long)]
    max_ttl_secs: Option<i64>,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut cfg = ServerConfig::default();
        if let Some(host) = self.host {
            cfg.host = host;
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if self.data_dir.is_some() {
            cfg.data_dir = self.data_dir;
        }
        if let Some(secs) = self.sweep_interval_secs {
            cfg.sweep_interval = Duration::from_secs(secs);
        }
        if self.cors_origins.is_some() {
            cfg.cors_origins = self.cors_origins;
        }
        if let Some(max) = self.max_secret_bytes {
            cfg.limits.max_secret_bytes = max;
        }
        if let Some(max) = self.max_ttl_secs {
            cfg.limits.max_ttl_seconds = max;
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LASTSECRET_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Cli::parse().into_config();
    lastsecret_server::run(cfg).await
}

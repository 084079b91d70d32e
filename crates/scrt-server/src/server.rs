use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    dirs,
    handlers::{create_secret, delete_secret, get_secret, health},
    store::Store,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shard directory. Defaults to a per-process temp directory.
    pub data_dir: Option<PathBuf>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("SCRT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("SCRT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            data_dir: std::env::var("SCRT_DATA_DIR").ok().map(PathBuf::from),
            cors_origins: std::env::var("SCRT_CORS_ORIGINS").ok(),
        }
    }
}

/// Routes for the secret API, without any listener attached.
pub fn build_router(state: AppState, cors_origins: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api", post(create_secret))
        .route("/api/{id}", get(get_secret).delete(delete_secret))
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C / SIGTERM, then delete every shard file the store created.
pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = dirs::data_dir(cfg.data_dir.as_deref())?;
    info!(
        data_dir = %data_dir.path.display(),
        ephemeral = data_dir.ephemeral,
        "using data directory"
    );

    let store = Store::open(&data_dir.path).context("open store")?;
    let state = AppState {
        store: store.clone(),
    };
    let app = build_router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "scrt server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    store.shutdown();
    if data_dir.ephemeral {
        // Only succeeds once every shard is gone.
        if let Err(e) = std::fs::remove_dir(&data_dir.path) {
            warn!(error = %e, dir = %data_dir.path.display(), "could not remove data directory");
        }
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

mod backend;
mod config;
mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use speedtest_engine::TracingLogger;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{Config, EngineKind};
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speedtest_server=debug,speedtest_engine=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let client = reqwest::Client::builder().build()?;
    let (selector, engine) = backend::from_config(&config, client);

    let shutdown = CancellationToken::new();
    let state = AppState {
        server_id: config.server_id.clone(),
        selector: Arc::new(selector),
        engine: Arc::new(engine),
        shutdown: shutdown.clone(),
        logger: Arc::new(TracingLogger),
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Speedtest server {} listening on {}", config.server_id, addr);
    match config.engine {
        EngineKind::Http => info!(
            "Delegated tests use {} peer(s): {}",
            config.peers.len(),
            config.peers.iter().map(|p| p.url.as_str()).collect::<Vec<_>>().join(", ")
        ),
        EngineKind::Loopback => info!("Delegated tests use the in-process loopback engine"),
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    // CORS: open to any origin for browser-based clients
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, CONTENT_LENGTH, ACCEPT_ENCODING])
        .expose_headers([CONTENT_LENGTH, CONTENT_TYPE]);

    Router::new()
        .route("/", get(routes::status))
        .route("/health", get(routes::health))
        .route("/ping", get(routes::ping))
        .route("/download", get(routes::download))
        .route("/upload", post(routes::upload).layer(DefaultBodyLimit::disable()))
        .route("/stream/download", get(routes::stream_download))
        .route("/stream/upload", get(routes::stream_upload))
        .route("/test/download", get(routes::test_download))
        .route("/test/upload", get(routes::test_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolves on Ctrl+C / SIGTERM after cancelling every running session.
async fn shutdown_signal(sessions: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
    sessions.cancel();
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::conversion::{AssetStore, BatchTranscodeCoordinator, MemoryAssetStore};
use crate::engine::Engine;
use crate::live::{HelperProcess, Negotiator, ObsBridge, Readiness, WebRtcBridge};
use crate::preview::PreviewService;

pub mod error;
pub mod routes_api;
pub mod routes_media;
pub mod ws;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub engine: Engine,
    /// Conversion results, as reported by the coordinator
    pub store: Arc<MemoryAssetStore>,
    pub coordinator: BatchTranscodeCoordinator,
    pub previews: PreviewService,
    pub obs: ObsBridge,
    pub webrtc: WebRtcBridge,
    /// Cancelled once the server is shutting down
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire every service around `engine`, negotiating WebRTC offers through
    /// `negotiator`.
    pub fn new(engine: Engine, negotiator: Arc<dyn Negotiator>, shutdown: CancellationToken) -> Self {
        let store = Arc::new(MemoryAssetStore::new());
        let catalog: Arc<dyn AssetStore> = store.clone();
        let previews = PreviewService::new(engine.clone());

        Self {
            coordinator: BatchTranscodeCoordinator::new(engine.clone(), catalog.clone()),
            obs: ObsBridge::new(engine.clone(), previews.clone(), catalog.clone(), shutdown.clone()),
            webrtc: WebRtcBridge::new(engine.clone(), negotiator, catalog, shutdown.clone()),
            engine,
            store,
            previews,
            shutdown,
        }
    }

    /// Like [`AppContext::new`], with the configured helper process as the
    /// negotiator and its readiness events feeding the WebRTC bridge.
    pub fn with_helper(engine: Engine, shutdown: CancellationToken) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel::<Readiness>();
        let helper = HelperProcess::spawn(engine.config.helper.clone(), ready_tx, shutdown.clone());
        let ctx = Self::new(engine, Arc::new(helper), shutdown);
        ctx.webrtc.spawn_readiness_loop(ready_rx);
        ctx
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/obs", get(ws::obs_ws))
        .route("/ws/webrtc", get(ws::webrtc_ws))
        .nest("/api", routes_api::api_routes())
        .merge(routes_media::media_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server and run until a shutdown signal arrives.
///
/// Every supervised transcode is stopped before this returns.
pub async fn start_server(engine: Engine) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", engine.config.server.host, engine.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let shutdown = CancellationToken::new();
    let ctx = AppContext::with_helper(engine, shutdown.clone());
    let supervisor = ctx.engine.supervisor.clone();
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(sessions = supervisor.len(), "Stopping transcode sessions");
    supervisor.stop_all(&CancellationToken::new()).await;
    shutdown.cancel();

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}

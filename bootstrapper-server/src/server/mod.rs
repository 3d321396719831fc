//! The HTTP API.

mod error;
mod handlers;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::k8s::ClusterProvider;

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The application's runtime config.
    pub config: Arc<Config>,
    /// The source of per-cluster resource clients.
    pub provider: Arc<dyn ClusterProvider>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cluster = Router::new()
        .route("/installation", post(handlers::create_installation))
        .route("/installations", get(handlers::list_installations))
        .route(
            "/installation/{name}",
            patch(handlers::patch_installation).delete(handlers::delete_installation),
        )
        .route("/installation/{name}/pods", get(handlers::list_pods))
        .route("/installation/{name}/secrets", get(handlers::get_secrets))
        .route("/installation/{name}/ws_logs", get(ws::ws_logs));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api/v1/cluster/{cluster}", cluster)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Application server.
pub struct AppServer {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The source of per-cluster resource clients.
    provider: Arc<dyn ClusterProvider>,

    /// A channel used for triggering graceful shutdown.
    shutdown: broadcast::Sender<()>,
}

impl AppServer {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, provider: Arc<dyn ClusterProvider>, shutdown: broadcast::Sender<()>) -> Self {
        Self { config, provider, shutdown }
    }

    /// Spawn the HTTP server.
    ///
    /// The socket is bound before this call returns; the server runs until a shutdown signal is
    /// broadcast, and triggers one itself if it fails.
    pub async fn spawn(self) -> Result<JoinHandle<()>> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.http_port))
            .await
            .context("error binding socket address for HTTP server")?;
        let app = router(AppState {
            config: self.config.clone(),
            provider: self.provider.clone(),
        });
        let shutdown = self.shutdown.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tracing::info!(port = self.config.http_port, "HTTP server listening");

        Ok(tokio::spawn(async move {
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _res = shutdown_rx.recv().await;
                })
                .await;
            if let Err(err) = res {
                tracing::error!(error = ?err, "error from HTTP server, shutting down");
                let _res = shutdown.send(());
            }
        }))
    }
}

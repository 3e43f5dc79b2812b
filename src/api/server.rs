/// HTTP server setup using `axum`.
///
/// Provides `AppState` (shared state) and the router/serve entry points.
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::handlers::{embeddings, health, preload};
use crate::cache::ModelCache;
use crate::embedder::download::ModelDownloader;
use crate::preload::Preloader;

/// Shared application state available to all handlers.
pub struct AppState<D> {
    pub cache: Arc<ModelCache>,
    pub preloader: Arc<Preloader<D>>,
}

impl<D: ModelDownloader> AppState<D> {
    pub fn new(preloader: Preloader<D>) -> Self {
        Self {
            cache: preloader.cache().clone(),
            preloader: Arc::new(preloader),
        }
    }
}

impl<D> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            preloader: self.preloader.clone(),
        }
    }
}

/// Build the router for all routes.
pub fn router<D: ModelDownloader + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/preload", post(preload::<D>))
        .route("/embeddings", post(embeddings::<D>))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("Listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server encountered an error")?;

    info!("Server stopped");
    Ok(())
}

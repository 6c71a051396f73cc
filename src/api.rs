use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use sox_bus::bus::Bus;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::handler::{assets, controller, stream};

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<Bus>,
    pub public_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(bus: Arc<Bus>, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            public_dir: Arc::new(public_dir.into()),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/home", get(assets::home_page))
        .route(
            "/controller",
            get(assets::controller_page).post(controller::command),
        )
        .route("/status", get(controller::status))
        .route("/stream", get(stream::stream))
        .fallback(assets::fallback)
        .with_state(state)
}

/// Binds `addr` and serves in the background until `cancel` fires. A bind
/// failure is returned to the caller.
pub(crate) async fn start_api_server(
    addr: &str,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Server run at http://{}", addr);

    let app = app_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
    });
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

async fn index() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/home")])
}

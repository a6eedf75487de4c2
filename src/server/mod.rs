//! The Sync Server: REST access to the timer plus the websocket push channel.

pub mod handlers;
pub mod socket;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    config::ServerConfig,
    timer::{AdvisoryGate, CommandGate, TimerController},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Everything a request or socket handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub(crate) timer: TimerController,
    pub(crate) gate: Arc<dyn CommandGate>,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, timer: TimerController) -> Self {
        Self {
            timer,
            gate: Arc::new(AdvisoryGate),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn CommandGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn timer(&self) -> &TimerController {
        &self.timer
    }
}

pub fn router(state: AppState) -> Router {
    let timer_routes = Router::new()
        .route("/timer", get(handlers::get_timer_state))
        .route("/timer/start", post(handlers::start_timer))
        .route("/timer/stop", post(handlers::stop_timer));

    Router::new()
        .merge(timer_routes.clone())
        .nest("/api", timer_routes)
        .route("/ws", get(socket::ws_handler))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log_warn!("ignoring unusable allowed origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Binds the configured address and serves until `state.shutdown` fires.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;
    log_info!("The Loop sync server listening on http://{}", local_addr);
    log_info!("allowed origins: {}", state.config.allowed_origins.join(", "));

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("sync server terminated with an error")?;

    log_info!("sync server stopped");
    Ok(())
}

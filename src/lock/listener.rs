//! Inbound push channel from the device.
//!
//! The device calls back on three fixed routes. Every request gets a short
//! plain-text answer; nothing here returns an error status.

use super::engine::EngineInner;
use crate::error::Result;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::Uri;
use axum::routing::any;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const UPDATED: &str = "Homebridge updated";
pub const VALID: &str = "valid";
pub const INVALID_TOKEN: &str = "invalid token";
pub const MISSING_TOKEN: &str = "missing token";
pub const INVALID_REQUEST: &str = "Invalid request";

pub(crate) fn router(engine: Arc<EngineInner>) -> Router {
    Router::new()
        .route("/locked", any(locked))
        .route("/unlocked", any(unlocked))
        .route("/validate", any(validate))
        .fallback(invalid_request)
        .with_state(engine)
}

async fn locked(State(engine): State<Arc<EngineInner>>) -> &'static str {
    debug!("[Listener] Locked");
    engine.on_locked_push();
    UPDATED
}

async fn unlocked(State(engine): State<Arc<EngineInner>>) -> &'static str {
    debug!("[Listener] Unlocked");
    engine.on_unlocked_push();
    UPDATED
}

async fn validate(
    State(engine): State<Arc<EngineInner>>,
    Query(params): Query<HashMap<String, String>>,
) -> &'static str {
    debug!("[Listener] Validate");
    let mut tokens = engine.tokens.lock();
    if !tokens.validation_enabled() {
        return VALID;
    }
    match params.get("token").filter(|token| !token.is_empty()) {
        None => MISSING_TOKEN,
        Some(token) if tokens.validate_and_consume(token) => VALID,
        Some(_) => INVALID_TOKEN,
    }
}

async fn invalid_request(uri: Uri) -> &'static str {
    warn!("[Listener] Invalid request: {}", uri.path().trim_start_matches('/'));
    INVALID_REQUEST
}

/// Running listener. Dropping the handle does not stop the server; call
/// [`ListenerServer::shutdown`] to wait for it, or [`ListenerServer::stop`]
/// from a context that cannot wait.
pub struct ListenerServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerServer {
    /// Bind `0.0.0.0:{port}` and start serving. Port 0 picks a free port.
    pub(crate) async fn start(engine: Arc<EngineInner>, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        let local_addr = listener.local_addr()?;
        info!("[Listener] Listen server: http://{}", local_addr);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(engine);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal.cancelled_owned())
                .await
            {
                warn!("[Listener] Server error: {}", e);
            }
            info!("[Listener] Stopped");
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the server to stop without waiting for it.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

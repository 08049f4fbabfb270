//! HTTP server hosting the gated surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::error::{Result, TollgateError};
use crate::gate::Gate;

use super::middleware::{admit, GateContext};

/// Apply the gate to an existing application router. The extension layer
/// sits outermost so the middleware can reach the context.
pub fn gated(router: Router, gate: Arc<Gate>) -> Router {
    let ctx = GateContext { gate };
    router
        .layer(axum::middleware::from_fn(admit))
        .layer(Extension(ctx))
}

/// Standalone server: health/status endpoints (expected to sit on the
/// configured skip-list) plus the gate applied to every other path.
pub struct Server {
    addr: SocketAddr,
    gate: Arc<Gate>,
}

impl Server {
    pub fn new(addr: SocketAddr, gate: Arc<Gate>) -> Self {
        Self { addr, gate }
    }

    /// The gated router served by this server.
    pub fn router(&self) -> Router {
        let app = Router::new()
            .route("/health", get(health))
            .route("/status", get(status))
            .fallback(not_found);
        gated(app, self.gate.clone())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server shuts down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        info!(addr = %self.addr, "Starting HTTP server for the admission gate");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TollgateError::Server(e.to_string())
            })
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not Found"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::gate::{IdentifierResolver, TrustClassifier};
    use crate::store::{MemoryRosters, MemoryStore, MemorySubjects};

    fn server() -> Server {
        let config = GateConfig::default();
        let store = Arc::new(MemoryStore::new());
        let trust = TrustClassifier::new(
            Arc::new(MemoryRosters::new()),
            config.trust.booking_horizon_days,
            config.trust.conversation_horizon_days,
        );
        let identities = IdentifierResolver::new(Arc::new(MemorySubjects::new()), trust);
        let gate = Arc::new(Gate::new(&config, store, identities));
        Server::new("127.0.0.1:0".parse().unwrap(), gate)
    }

    #[tokio::test]
    async fn router_builds() {
        let _router = server().router();
    }
}

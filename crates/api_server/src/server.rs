use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use torrent_node_core::{NodeError, NodeResult, NodeState, StopFlag};

use crate::handlers;

/// Shared handler context.
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<NodeState>,
    pub version: String,
    pub git_hash: String,
}

pub struct NodeServerBuilder {
    state: ApiState,
    cors_enabled: bool,
}

impl NodeServerBuilder {
    pub fn new(node: Arc<NodeState>, version: impl Into<String>, git_hash: impl Into<String>) -> Self {
        Self {
            state: ApiState {
                node,
                version: version.into(),
                git_hash: git_hash.into(),
            },
            cors_enabled: true,
        }
    }

    pub fn disable_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }

    pub fn router(&self) -> Router {
        let cors_layer = tower::util::option_layer(self.cors_enabled.then(|| {
            // Peers and dashboards call from anywhere; mirror the node's
            // open `Access-Control-Allow-Origin` policy.
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers([header::CONTENT_TYPE])
                .allow_methods([Method::GET, Method::POST])
        }));
        Router::new()
            .route("/status", get(handlers::status).post(handlers::status))
            .route("/", post(handlers::dispatch_root))
            .route("/:method", post(handlers::dispatch_method))
            .layer(cors_layer)
            .with_state(self.state.clone())
    }

    /// Binds and serves until the stop flag flips.
    pub async fn serve(self, addr: SocketAddr, stop: StopFlag) -> NodeResult<NodeServer> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::User(format!("cannot bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NodeError::User(e.to_string()))?;
        tracing::info!(%local_addr, "query surface listening");

        let router = self.router();
        let mut stop = stop;
        let handle = tokio::spawn(async move {
            let shutdown = async move { stop.stopped().await };
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("server failed: {err}");
            }
        });
        Ok(NodeServer { handle, local_addr })
    }
}

pub struct NodeServer {
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl NodeServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the server to finish shutting down.
    pub async fn stopped(self) {
        let _ = self.handle.await;
    }
}

//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Create Axum Router with the static and upgrade routes
//! - Wire up middleware (tracing, request timeout)
//! - Bind server to listener and run the accept loop on its own task
//! - Bound header reads and stalled writes on every accepted socket
//! - Race serve failure against external cancellation
//! - Bounded graceful shutdown of the listener and in-flight connections

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, extract::ConnectInfo, routing::any, Router};
use hyper::{body::Incoming, service::service_fn, Request};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tower_http::{
    services::{ServeDir, ServeFile},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::instrument::WithSubscriber;

use crate::config::ServerConfig;
use crate::http::websocket::{ws_handler, WsState};
use crate::net::{ConnectionTracker, WriteTimeout};
use crate::subscriber::Subscriber;

/// Grace period for in-flight work once shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry document served at `/`, relative to the public directory.
pub const INDEX_FILE: &str = "index.html";

/// Errors that end a server run.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("serve task ended without reporting a result")]
    ServeTaskLost,

    #[error("graceful shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Static file server with a single websocket upgrade route.
///
/// A plain value: config, subscriber and the public directory. Every call to
/// [`Server::start`] builds its own router, listener and shutdown state.
#[derive(Clone)]
pub struct Server {
    config: ServerConfig,
    subscriber: Arc<dyn Subscriber>,
    public_dir: PathBuf,
}

impl Server {
    /// Create a new server serving `./public`.
    pub fn new(config: ServerConfig, subscriber: impl Subscriber) -> Self {
        Self {
            config,
            subscriber: Arc::new(subscriber),
            public_dir: PathBuf::from("./public"),
        }
    }

    /// Serve static files from `dir` instead of `./public`.
    pub fn with_public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = dir.into();
        self
    }

    /// Bind `config.addr` and serve until `parent` is cancelled or serving fails.
    ///
    /// Returns `Ok(())` when shutdown drained cleanly.
    pub async fn start(&self, parent: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.addr.clone(),
                source,
            })?;
        self.run(listener, parent).await
    }

    /// Serve on an already bound listener. See [`Server::start`].
    pub async fn run(
        &self,
        listener: TcpListener,
        parent: CancellationToken,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.config.addr.clone(),
            source,
        })?;

        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        // Connections hang off their own scope so a timed out shutdown can
        // cancel them without touching the caller's token.
        let base = parent.child_token();
        let stop = CancellationToken::new();
        let tracker = ConnectionTracker::new();

        let app = self.build_router(WsState {
            subscriber: Arc::clone(&self.subscriber),
            base: base.clone(),
            tracker: tracker.clone(),
            dispatch: dispatch.clone(),
        });

        tracing::info!(
            address = %addr,
            timeout = ?self.config.timeout,
            public_dir = %self.public_dir.display(),
            "starting server"
        );

        let (serve_tx, mut serve_rx) = oneshot::channel();
        let serve_stop = stop.clone();
        let timeout = self.config.timeout;
        tokio::spawn(
            async move {
                let result = serve(listener, app, timeout, serve_stop).await;
                let _ = serve_tx.send(result);
            }
            .with_subscriber(dispatch),
        );

        let served = tokio::select! {
            result = &mut serve_rx => {
                match &result {
                    Ok(Err(e)) => tracing::error!(error = %e, "server failed"),
                    Ok(Ok(())) => tracing::warn!("server stopped without a shutdown request"),
                    Err(_) => tracing::error!("serve task ended without reporting a result"),
                }
                Some(result)
            }
            _ = parent.cancelled() => None,
        };

        tracing::info!(in_flight = tracker.active_count(), "shutting server down");
        stop.cancel();

        let drain = async {
            let result = match served {
                Some(result) => result,
                None => serve_rx.await,
            };
            tracker.wait_idle().await;
            result
        };

        // Fresh deadline: `parent` may already be cancelled.
        let result = match tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    in_flight = tracker.active_count(),
                    timeout = ?SHUTDOWN_TIMEOUT,
                    "graceful shutdown timed out, cancelling remaining connections"
                );
                base.cancel();
                return Err(ServerError::ShutdownTimeout(SHUTDOWN_TIMEOUT));
            }
        };

        match result {
            Ok(Ok(())) => {
                tracing::info!("HTTP server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ServerError::Serve(e)),
            Err(_) => Err(ServerError::ServeTaskLost),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Any path not claimed by `/public` or `/ws` gets the entry document.
    #[allow(deprecated)]
    fn build_router(&self, ws: WsState) -> Router {
        Router::new()
            .nest_service("/public", ServeDir::new(&self.public_dir))
            .route("/ws", any(ws_handler))
            .fallback_service(ServeFile::new(self.public_dir.join(INDEX_FILE)))
            .with_state(ws)
            .layer(TimeoutLayer::new(self.config.timeout))
            .layer(TraceLayer::new_for_http())
    }
}

/// Accept loop with HTTP/1 + HTTP/2 auto-detection and upgrade support.
///
/// Every socket gets `timeout` to deliver its request headers, and writes
/// that make no progress for `timeout` fail. Once `stop` is cancelled the
/// listener is dropped and in-flight HTTP exchanges are drained; upgraded
/// websockets have left hyper by then and are drained by the caller.
async fn serve(
    listener: TcpListener,
    app: Router,
    timeout: Duration,
    stop: CancellationToken,
) -> std::io::Result<()> {
    let dispatch = tracing::dispatcher::get_default(|d| d.clone());
    let mut builder = AutoBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeout);
    let graceful = GracefulShutdown::new();

    loop {
        let (socket, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(e) if is_connection_error(&e) => {
                    tracing::debug!(error = %e, "accept failed, continuing");
                    continue;
                }
                Err(e) => return Err(e),
            },
            _ = stop.cancelled() => break,
        };

        // Match axum::serve: TCP_NODELAY for low latency.
        if let Err(e) = socket.set_nodelay(true) {
            tracing::warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }

        let app = app.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let mut app = app.clone();
            let mut req = req.map(Body::new);
            req.extensions_mut().insert(ConnectInfo(peer));
            async move { app.call(req).await }
        });

        let io = TokioIo::new(WriteTimeout::new(socket, timeout));
        let conn = builder.serve_connection_with_upgrades(io, service);
        let conn = graceful.watch(conn.into_owned());

        tokio::spawn(
            async move {
                if let Err(e) = conn.await {
                    tracing::debug!(peer = %peer, error = %e, "connection closed with error");
                }
            }
            .with_subscriber(dispatch.clone()),
        );
    }

    drop(listener);
    graceful.shutdown().await;
    Ok(())
}

/// Per-connection accept failures that leave the listener usable.
fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("public_dir", &self.public_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::EchoSubscriber;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn fixture() -> (tempfile::TempDir, Server) {
        let root = tempfile::tempdir().unwrap();
        let public = root.path().join("public");
        std::fs::create_dir(&public).unwrap();
        std::fs::write(public.join(INDEX_FILE), "<h1>entry</h1>").unwrap();
        std::fs::write(public.join("app.js"), "console.log(1)").unwrap();
        std::fs::write(root.path().join("secret.txt"), "top secret").unwrap();

        let server = Server::new(
            ServerConfig::new("127.0.0.1:0", Duration::from_secs(5)),
            EchoSubscriber,
        )
        .with_public_dir(public);
        (root, server)
    }

    fn router(server: &Server) -> Router {
        server.build_router(WsState {
            subscriber: Arc::clone(&server.subscriber),
            base: CancellationToken::new(),
            tracker: ConnectionTracker::new(),
            dispatch: tracing::Dispatch::none(),
        })
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn root_serves_entry_document() {
        let (_root, server) = fixture();
        let (status, body) = get(router(&server), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>entry</h1>");
    }

    #[tokio::test]
    async fn public_prefix_is_stripped() {
        let (_root, server) = fixture();
        let (status, body) = get(router(&server), "/public/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log(1)");
    }

    #[tokio::test]
    async fn missing_public_file_is_not_found() {
        let (_root, server) = fixture();
        let (status, _) = get(router(&server), "/public/nope.css").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn public_route_does_not_escape_directory() {
        let (_root, server) = fixture();

        for uri in [
            "/public/../secret.txt",
            "/public/../../etc/passwd",
            "/public/%2e%2e/secret.txt",
            "/public/..%2fsecret.txt",
        ] {
            let (status, body) = get(router(&server), uri).await;
            assert_ne!(status, StatusCode::OK, "{uri} escaped the public directory");
            assert!(!body.contains("top secret"), "{uri} leaked a file");
        }
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let server = Server::new(
            ServerConfig::new(addr.to_string(), Duration::from_secs(5)),
            EchoSubscriber,
        );
        let err = server.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }), "got {err}");
    }
}

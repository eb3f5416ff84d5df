//! HTTP intake endpoint.
//!
//! - `GET /` and `GET /message` return fixed pages.
//! - `GET` on any other path serves a file from the static root, or 404.
//! - `POST` on any path relays the raw body as one datagram and redirects to
//!   `/` with `302 Found`, whatever happened to the datagram. A body over the
//!   configured limit is logged and not relayed, but still redirected.

pub mod pages;
pub mod static_files;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::relay::RelayClient;

/// State shared by intake handlers.
#[derive(Debug, Clone)]
pub struct IntakeState {
    relay: Arc<RelayClient>,
    static_root: Arc<PathBuf>,
}

impl IntakeState {
    /// Create handler state from a relay client and a static root.
    #[must_use]
    pub fn new(relay: RelayClient, static_root: PathBuf) -> Self {
        Self {
            relay: Arc::new(relay),
            static_root: Arc::new(static_root),
        }
    }
}

/// Build the intake router.
pub fn router(state: IntakeState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(pages::index).post(submit))
        .route("/message", get(pages::message_form).post(submit))
        .fallback(fallback)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

/// The HTTP intake server.
#[derive(Debug)]
pub struct IntakeServer {
    listener: TcpListener,
    router: Router,
}

impl IntakeServer {
    /// Bind the HTTP listener and the relay client from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if either socket cannot be bound.
    pub async fn bind(config: &Config) -> Result<Self> {
        let addr = config.http_addr();
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let relay = RelayClient::bind(config.relay_addr()).await?;
        let state = IntakeState::new(relay, config.http.static_root.clone());

        Ok(Self {
            listener,
            router: router(state, config.http.max_body_bytes),
        })
    }

    /// The address the HTTP server is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while accepting connections.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(address = %addr, "Server started: http://{addr}");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Relay the body and redirect home.
async fn submit(
    State(state): State<IntakeState>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    relay_body(&state, body).await;
    redirect_home()
}

/// Everything not matched by a named route.
async fn fallback(
    State(state): State<IntakeState>,
    method: Method,
    uri: Uri,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    match method {
        Method::POST => {
            relay_body(&state, body).await;
            redirect_home()
        }
        Method::GET | Method::HEAD => static_files::serve(&state.static_root, uri.path()).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn relay_body(state: &IntakeState, body: std::result::Result<Bytes, BytesRejection>) {
    match body {
        Ok(body) => state.relay.forward(&body).await,
        Err(rejection) => {
            error!(status = %rejection.status(), error = %rejection, "discarding request body");
        }
    }
}

fn redirect_home() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
}

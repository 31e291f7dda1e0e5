use std::future::IntoFuture;
use std::net::SocketAddr;

use axum::ServiceExt;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderValue, header};
use tally_common::CancellationToken;
use tally_store::StoreError;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::compression::predicate::{DefaultPredicate, Predicate, SizeAbove};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::constants;
use crate::endpoints;
use crate::middlewares::{self, CatchPanicLayer, NormalizePath};
use crate::service::ServiceState;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] std::io::Error),

    /// The server stopped with an I/O error.
    #[error("http server failed")]
    ServeFailed(#[source] std::io::Error),

    /// The metric store could not be created.
    #[error("failed to initialize metric store")]
    Store(#[from] StoreError),
}

pub type App = NormalizePath<axum::Router>;

/// Builds the axum application with all routes and middleware.
pub fn make_app(state: ServiceState) -> App {
    // Build the router middleware into a single service which runs _after_ routing. Layers added
    // first are called first:
    //  - Requests go from top to bottom
    //  - Responses go from bottom to top
    let middleware = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(constants::SERVER),
        ))
        .layer(middlewares::trace_http_layer())
        .layer(RequestDecompressionLayer::new())
        .layer(
            CompressionLayer::new().compress_when(
                SizeAbove::new(constants::COMPRESSION_MIN_SIZE).and(DefaultPredicate::new()),
            ),
        );

    // Signatures cover uncompressed bodies and must run inside the compression layers. Each
    // `layer` call wraps the previous one, so the last one runs first.
    let router = endpoints::routes(state.clone())
        .layer(DefaultBodyLimit::max(state.config().max_body_size()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middlewares::verify_signature,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middlewares::sign_response,
        ))
        .layer(middleware)
        .with_state(state);

    // Middlewares that modify the request path must wrap the router.
    NormalizePath::new(router)
}

/// The HTTP server hosting all endpoints.
pub struct HttpServer {
    state: ServiceState,
    listener: TcpListener,
}

impl HttpServer {
    /// Binds the listener to the configured address.
    pub async fn bind(state: ServiceState) -> Result<Self, ServerError> {
        let addr = state.config().listen_addr().to_owned();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(ServerError::BindFailed)?;

        Ok(Self { state, listener })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::BindFailed)
    }

    /// Serves requests until `shutdown` fires.
    ///
    /// Once shutdown starts, no new connections are accepted. In-flight requests are awaited for
    /// at most the configured shutdown timeout.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let Self { state, listener } = self;
        let timeout = state.config().shutdown_timeout();

        if let Ok(addr) = listener.local_addr() {
            tally_log::info!("spawning http server");
            tally_log::info!("  listening on http://{addr}/");
        }

        let app = make_app(state);
        let server = axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future();

        let drain_deadline = async {
            shutdown.cancelled().await;
            tally_log::info!("shutting down http server");
            tokio::time::sleep(timeout).await;
        };

        tokio::select! {
            result = server => result.map_err(ServerError::ServeFailed),
            () = drain_deadline => {
                tally_log::warn!("in-flight requests did not complete within the shutdown timeout");
                Ok(())
            }
        }
    }
}

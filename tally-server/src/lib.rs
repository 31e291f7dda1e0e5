//! The Tally ingest server.
//!
//! The server accepts metrics over HTTP, validates them, and applies them to a
//! [`MetricStore`](tally_store::MetricStore). Depending on the configuration, the store is held in
//! memory and snapshotted to a file periodically, or written through to a SQL database.
//!
//! # Endpoints
//!
//! | Method and path                   | Purpose                                  |
//! |-----------------------------------|------------------------------------------|
//! | `POST /update/{type}/{name}/{v}`  | Update a single metric from the path.    |
//! | `POST /update/`                   | Update a single metric from JSON.        |
//! | `POST /updates/`                  | Update a batch of metrics from JSON.     |
//! | `GET /value/{type}/{name}`        | Read a metric as plain text.             |
//! | `POST /value/`                    | Read a metric as JSON.                   |
//! | `GET /`                           | HTML listing of all metrics.             |
//! | `GET /ping`                       | Storage liveness check.                  |
//!
//! Request bodies may be gzip compressed, and responses are compressed when the client accepts
//! it. With a shared key configured, signed requests are verified and JSON responses are signed,
//! see [`tally_common::signature`].
#![warn(missing_docs)]

mod constants;
mod endpoints;
mod extractors;
mod middlewares;
mod server;
mod service;
mod utils;

use std::sync::Arc;

use tally_common::CancellationToken;
use tally_config::Config;

pub use self::server::{HttpServer, ServerError};
pub use self::service::ServiceState;

/// Runs the server until `shutdown` fires.
///
/// After the listener stops accepting connections, in-flight requests are given the configured
/// shutdown timeout to complete. A final snapshot is saved before returning.
pub async fn run(config: Arc<Config>, shutdown: CancellationToken) -> Result<(), ServerError> {
    let store = tally_store::from_config(&config, shutdown.child_token()).await?;
    let state = ServiceState::new(config.clone(), store);

    let server = HttpServer::bind(state.clone()).await?;
    let snapshots = service::spawn_snapshots(state.clone(), shutdown.clone());

    let result = server.serve(shutdown.clone()).await;

    if let Some(snapshots) = snapshots
        && let Err(error) = snapshots.await
    {
        tally_log::error!(error = &error as &dyn std::error::Error, "snapshot task failed");
    }

    service::final_save(&state).await;
    result
}

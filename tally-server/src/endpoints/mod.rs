//! Web server endpoints.
//!
//! Update endpoints save a snapshot after each successful request when the store is configured
//! for synchronous saving. Read endpoints never write.

use axum::Router;
use axum::routing::{get, post};

use crate::middlewares;
use crate::service::ServiceState;

mod index;
mod ping;
mod update;
mod value;

/// Returns the router with all endpoints of the server.
pub fn routes(state: ServiceState) -> Router<ServiceState> {
    let updates = Router::new()
        .route("/update/{ty}/{name}/{value}", post(update::handle_text))
        .route("/update/", post(update::handle_json))
        .route("/updates/", post(update::handle_batch))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middlewares::sync_save,
        ));

    Router::new()
        .route("/", get(index::handle))
        .route("/ping", get(ping::handle))
        .route("/value/{ty}/{name}", get(value::handle_text))
        .route("/value/", post(value::handle_json))
        .merge(updates)
}

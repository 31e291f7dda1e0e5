use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::service::{self, ServiceState};

/// Saves a snapshot after every successful update when the store interval is zero.
///
/// The snapshot is written before the response is returned, so a client that received a success
/// status can rely on the update being persisted. Failures to save are logged and do not change
/// the response.
pub async fn sync_save(State(state): State<ServiceState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    if state.config().sync_save() && response.status().is_success() {
        service::save(&state).await;
    }

    response
}

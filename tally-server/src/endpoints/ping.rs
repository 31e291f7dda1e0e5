use axum::extract::State;
use axum::http::StatusCode;

use crate::service::ServiceState;
use crate::utils::ApiError;

/// Reports whether the store is reachable.
pub async fn handle(State(state): State<ServiceState>) -> Result<StatusCode, ApiError> {
    state.store().ping().await?;
    Ok(StatusCode::OK)
}

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use tally_metrics::{Metric, WireMetric};

use crate::endpoints::value::lookup;
use crate::extractors::RequestMime;
use crate::service::ServiceState;
use crate::utils::ApiError;

/// Reads back the stored state of the given metrics, in order.
async fn stored(state: &ServiceState, metrics: Vec<Metric>) -> Result<Vec<WireMetric>, ApiError> {
    let mut result = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let ty = metric.ty();
        result.push(lookup(state.store(), ty, metric.id).await?.into());
    }
    Ok(result)
}

/// Updates a single metric given as `/update/{type}/{name}/{value}`.
pub async fn handle_text(
    State(state): State<ServiceState>,
    mime: RequestMime,
    Path((ty, name, value)): Path<(String, String, String)>,
) -> Result<Json<WireMetric>, ApiError> {
    if !mime.is_text_or_absent() {
        return Err(ApiError::UnsupportedMediaType);
    }

    let metric = tally_metrics::decode_text(&ty, &name, &value)?;
    state.store().update(&metric).await?;

    let ty = metric.ty();
    Ok(Json(lookup(state.store(), ty, metric.id).await?.into()))
}

/// Updates a single metric given as JSON object.
pub async fn handle_json(
    State(state): State<ServiceState>,
    mime: RequestMime,
    body: Bytes,
) -> Result<Json<WireMetric>, ApiError> {
    if !mime.is_json() {
        return Err(ApiError::UnsupportedMediaType);
    }

    let metric = tally_metrics::decode_json(&body)?.validate()?;
    state.store().update(&metric).await?;

    let ty = metric.ty();
    Ok(Json(lookup(state.store(), ty, metric.id).await?.into()))
}

/// Updates a batch of metrics given as JSON array.
///
/// The batch is validated as a whole before anything is written.
pub async fn handle_batch(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<Json<Vec<WireMetric>>, ApiError> {
    let batch = tally_metrics::decode_json_batch(&body)?;
    let metrics = tally_metrics::validate_batch(batch)?;

    state.store().update_batch(&metrics).await?;
    tally_log::debug!(count = metrics.len(), "applied metrics batch");

    Ok(Json(stored(&state, metrics).await?))
}

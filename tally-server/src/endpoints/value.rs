use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use tally_metrics::{DecodeError, Metric, MetricType, MetricValue, WireMetric};
use tally_store::{MetricStore, StoreError};

use crate::extractors::RequestMime;
use crate::service::ServiceState;
use crate::utils::ApiError;

/// Reads a metric from the store, failing with [`StoreError::NotFound`] if it does not exist.
pub async fn lookup(store: &dyn MetricStore, ty: MetricType, id: String) -> Result<Metric, ApiError> {
    match store.get(ty, &id).await? {
        Some(value) => Ok(Metric { id, value }),
        None => Err(StoreError::NotFound { ty, id }.into()),
    }
}

/// Returns the value of a metric as plain text.
pub async fn handle_text(
    State(state): State<ServiceState>,
    Path((ty, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let ty = ty.parse::<MetricType>().map_err(DecodeError::from)?;
    let metric = lookup(state.store(), ty, name).await?;

    Ok(match metric.value {
        MetricValue::Gauge(value) => value.to_string(),
        MetricValue::Counter(value) => value.to_string(),
    })
}

/// Returns a metric as JSON, looked up by the `id` and `type` of the request body.
pub async fn handle_json(
    State(state): State<ServiceState>,
    mime: RequestMime,
    body: Bytes,
) -> Result<Json<WireMetric>, ApiError> {
    if !mime.is_json() {
        return Err(ApiError::UnsupportedMediaType);
    }

    let query = tally_metrics::decode_json(&body)?;
    let (ty, id) = tally_metrics::decode_query(query)?;
    let metric = lookup(state.store(), ty, id).await?;

    Ok(Json(metric.into()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use similar_asserts::assert_eq;

    use crate::endpoints::tests::{body_string, default_state, post_json, send};

    use super::*;

    async fn get(state: &ServiceState, uri: &str) -> (StatusCode, String) {
        let response = send(state, Request::get(uri).body(Body::empty()).unwrap()).await;
        (response.status(), body_string(response).await)
    }

    #[tokio::test]
    async fn test_text_values() {
        let (state, store) = default_state();
        store.set_gauge("Alloc", 3.0).await.unwrap();
        store.set_gauge("RandomValue", 0.125).await.unwrap();
        store.add_counter("PollCount", 42).await.unwrap();

        assert_eq!(get(&state, "/value/gauge/Alloc").await, (StatusCode::OK, "3".to_owned()));
        assert_eq!(
            get(&state, "/value/gauge/RandomValue").await,
            (StatusCode::OK, "0.125".to_owned())
        );
        assert_eq!(
            get(&state, "/value/counter/PollCount").await,
            (StatusCode::OK, "42".to_owned())
        );
    }

    #[tokio::test]
    async fn test_text_errors() {
        let (state, store) = default_state();
        store.set_gauge("Alloc", 3.0).await.unwrap();

        assert_eq!(get(&state, "/value/histogram/Alloc").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(get(&state, "/value/gauge/Missing").await.0, StatusCode::NOT_FOUND);
        // Gauges and counters live in separate namespaces.
        assert_eq!(get(&state, "/value/counter/Alloc").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_json_value() {
        let (state, store) = default_state();
        store.add_counter("PollCount", 5).await.unwrap();

        let request = post_json("/value/", r#"{"id":"PollCount","type":"counter","delta":100}"#);
        let response = send(&state, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"id":"PollCount","type":"counter","delta":5}"#
        );
    }

    #[tokio::test]
    async fn test_json_value_errors() {
        let (state, _) = default_state();

        let response = send(&state, post_json("/value/", r#"{"id":"Alloc","type":"gauge"}"#)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&state, post_json("/value/", r#"{"id":"Alloc","type":"set"}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&state, post_json("/value/", r#"{"type":"gauge"}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::post("/value/")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(r#"{"id":"Alloc","type":"gauge"}"#))
            .unwrap();
        let response = send(&state, request).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}

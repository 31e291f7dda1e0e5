use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tally_common::constants::SIGNATURE_HEADER;

use crate::service::ServiceState;
use crate::utils::ApiError;

/// Verifies the payload signature of incoming requests.
///
/// Verification only happens when a key is configured and the request carries a signature header.
/// The digest is computed over the decompressed body. A mismatch is rejected with
/// `400 Bad Request` before the request reaches a handler.
pub async fn verify_signature(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(signer) = state.signer() else {
        return next.run(request).await;
    };

    let Some(signature) = request.headers().get(SIGNATURE_HEADER) else {
        return next.run(request).await;
    };

    let Ok(signature) = signature.to_str().map(str::to_owned) else {
        return ApiError::SignatureMismatch.into_response();
    };

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.config().max_body_size()).await {
        Ok(body) => body,
        Err(error) => return ApiError::InvalidBody(error).into_response(),
    };

    if !signer.verify(&body, &signature) {
        tally_log::debug!("rejecting request with invalid payload signature");
        return ApiError::SignatureMismatch.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(body))).await
}

/// Signs JSON responses with the configured key.
///
/// The digest covers the uncompressed body, so this middleware must run inside the compression
/// layer.
pub async fn sign_response(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    let Some(signer) = state.signer() else {
        return response;
    };

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .is_some_and(|mime| mime.essence_str() == mime::APPLICATION_JSON.essence_str());

    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(error) => {
            tally_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to buffer response for signing"
            );
            return ApiError::InvalidBody(error).into_response();
        }
    };

    if let Ok(value) = HeaderValue::from_str(&signer.sign(&body)) {
        parts.headers.insert(SIGNATURE_HEADER, value);
    }

    Response::from_parts(parts, Body::from(body))
}

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
pub use tower_http::catch_panic::CatchPanicLayer;

use crate::utils::ApiErrorResponse;

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    match payload.downcast_ref::<String>() {
        Some(message) => message,
        None => payload
            .downcast_ref::<&str>()
            .copied()
            .unwrap_or("no error details"),
    }
}

/// Turns a panic in a request handler into a `500 Internal Server Error`.
///
/// Registered through [`CatchPanicLayer::custom`]. The panic message is logged but not exposed to
/// the client.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(payload.as_ref());
    tally_log::error!(panic = message, "request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiErrorResponse::with_detail("internal server error"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("owned boom")), "owned boom");
        assert_eq!(panic_message(&42_u32), "no error details");
    }

    #[test]
    fn test_panic_becomes_internal_error() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

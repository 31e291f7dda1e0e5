//! Header names and paths shared between the agent and the server.

use http::HeaderName;

/// Header carrying the lowercase hex HMAC-SHA256 digest of the uncompressed body.
///
/// Transmitted as `HashSHA256`. Header names are case-insensitive, so the normalized lowercase
/// form is used internally.
pub const SIGNATURE_HEADER: HeaderName = HeaderName::from_static("hashsha256");

/// Path of the batch ingest endpoint.
pub const BATCH_PATH: &str = "/updates/";
